//! Terminal output rendering

mod html;

pub use html::{escape_html, AnsiToMarkupConverter};
