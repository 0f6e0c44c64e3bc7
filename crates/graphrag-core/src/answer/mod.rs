//! Answer synthesis and the response contract.

pub mod model;
pub mod parse;
pub mod synthesizer;

pub use model::{Answer, OutputFormat, ANSWER_KIND, INSUFFICIENT_INFORMATION};
pub use parse::parse_answer;
pub use synthesizer::AnswerSynthesizer;
