use serde::{Deserialize, Serialize};

/// How the host should render a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Message,
    Embed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

/// Rich content block attached to a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub color: Option<u32>,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

/// Reply produced by a command handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub content: String,
    pub response_type: ResponseType,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub embeds: Vec<Embed>,
}

impl Response {
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            response_type: ResponseType::Message,
            ephemeral: false,
            embeds: Vec::new(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            response_type: ResponseType::Error,
            ephemeral: true,
            embeds: Vec::new(),
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: String::new(),
            response_type: ResponseType::Embed,
            ephemeral: false,
            embeds: vec![embed],
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// Plain-text rendering for hosts without rich output
    pub fn render_text(&self) -> String {
        let mut out = self.content.clone();
        for embed in &self.embeds {
            if !out.is_empty() {
                out.push('\n');
            }
            if let Some(title) = &embed.title {
                out.push_str(&format!("== {} ==", title));
            }
            if let Some(desc) = &embed.description {
                out.push_str(&format!("\n{}", desc));
            }
            for field in &embed.fields {
                out.push_str(&format!("\n{}: {}", field.name, field.value));
            }
            if let Some(footer) = &embed.footer {
                out.push_str(&format!("\n-- {}", footer));
            }
        }
        out
    }
}
