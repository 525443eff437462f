pub mod blob;
mod cache;
mod field;
mod markdown;
mod styled;

pub use blob::BlobError;
pub use cache::RichTextCache;
pub use field::{FieldSpec, RichTextField, TextStyle, FIELD_SPECS};
pub use markdown::{render_markdown, MarkdownRenderer, PulldownRenderer};
pub use styled::{SpanStyle, StyledLine, StyledSpan, StyledText};
