pub mod capture_parser;
pub mod errors;
pub mod execute;
pub mod http_request;
pub mod http_request_executor;
pub mod registry;
pub mod script_loader;

pub use capture_parser::{convert_capture, parse_capture, CaptureRecord};
pub use errors::{Result, TunerError};
pub use http_request::{Body, HttpMethod, RequestDefinition, StringMap};
pub use http_request_executor::{EncodedPayload, ExecutionContext, PreparedRequest, RequestPatch};
pub use registry::{load_registry, RequestRegistry};
pub use script_loader::{detect_method, ScriptEngine};
