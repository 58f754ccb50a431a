//! Shared protocol types for the aidesk workspace: the event trace emitted
//! during a turn, the capability model, the provider-facing message shapes,
//! and the HTTP wire types. Both the core and the server depend on this crate
//! so that the SSE encoder and the buffered JSON encoder speak the exact same
//! representation.

mod capability;
mod events;
mod models;
mod wire;

pub use capability::CapabilitySet;
pub use capability::SecurityPreset;
pub use capability::SecurityProfile;
pub use capability::TeamRole;
pub use events::AssistantMessageEvent;
pub use events::ContextTrimEvent;
pub use events::ErrorEvent;
pub use events::PermissionEvent;
pub use events::ProviderDoneEvent;
pub use events::ProviderFallbackEvent;
pub use events::ProviderStartEvent;
pub use events::SecurityProfileEvent;
pub use events::TaskArtifactEvent;
pub use events::ToolCallEvent;
pub use events::ToolResultEvent;
pub use events::TurnEvent;
pub use models::ChatMessage;
pub use models::MessageRole;
pub use models::ToolCallRequest;
pub use wire::ChatRequest;
pub use wire::ChatResponse;
pub use wire::FileDescriptor;
