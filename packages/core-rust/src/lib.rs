//! `docbridge` core: topic grammar, command descriptors, the operation
//! catalog, and parameter codecs. No I/O and no async runtime.

pub mod catalog;
pub mod codec;
pub mod command;
pub mod topic;
pub mod types;

pub use catalog::{Operation, OperationSpec, ResultShape, Scope};
pub use codec::{CodecError, ExtendedJsonCodec, MsgPackCodec, ParameterCodec};
pub use command::{CommandDescriptor, Invocation, ParseError};
pub use topic::{filter_response_topics, topic_matches, BaseTopic, ResponseTopic, ValidationError};
pub use types::{DateTime, Document, ObjectId, Value};
