//! Domain layer - Core runtime types with no host dependencies
//! 
//! This layer contains:
//! - Entities: wire-level units (Message, Command, Event, Response) and the
//!   extension model (Manifest, Permission, Health)
//! - Traits: the extension contract and the host collaborator façades

pub mod entities;
pub mod traits;
