pub mod builtin;
pub mod definition;
pub mod env;
pub mod registry;
pub mod static_input;
pub mod toolbox;

pub use definition::{ParamSchema, ParamType, ToolDefinition};
pub use env::{ConstructError, LlmHandle, ToolEnv};
pub use registry::{ConfigParams, ToolConstructor, ToolEntry, ToolRef, ToolRegistry};
pub use static_input::StaticInputTool;
pub use toolbox::Toolbox;
