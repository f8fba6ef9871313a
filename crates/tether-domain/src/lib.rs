pub mod dispatcher;
pub mod error;
pub mod node;
pub mod path;
pub mod profile;
pub mod registry;
pub mod request;
pub mod security;
pub mod session;
pub mod traits;
pub mod value;

pub use dispatcher::{DispatcherConfig, DownlinkDispatcher};
pub use error::{DomainError, DomainResult};
pub use node::ProtocolNode;
pub use path::ResourcePath;
pub use profile::{
    resolve_profile, BootstrapConfig, ClientSettings, DeviceBehaviorProfile, ServerEndpoint,
};
pub use registry::SessionRegistry;
pub use request::{
    build_operation, ContentFormat, DownlinkOperation, NotificationAttributes, OperationKind,
    OperationPayload, DEFAULT_TIMEOUT,
};
pub use security::{SecurityInfo, SecurityMode};
pub use session::{DeviceSession, SessionRemoved};
pub use traits::{
    CredentialLookup, CredentialSource, DeviceMetadata, LogSeverity, OperationResponse,
    PayloadCodec, PlatformPublisher, ResponseStatus, TransportError, TransportSender,
};
pub use value::{values_equal, ResourceType, ResourceValue};
