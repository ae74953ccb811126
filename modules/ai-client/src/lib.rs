pub mod error;
pub mod gemini;
pub mod openai;
pub mod traits;
pub mod util;

pub use error::{AiError, Result};
pub use gemini::{Gemini, KeyPool};
pub use openai::OpenAi;
pub use traits::{GenerationRequest, TextGenerator};
pub use util::{extract_json_array, extract_json_object, strip_code_blocks, truncate_to_char_boundary};
