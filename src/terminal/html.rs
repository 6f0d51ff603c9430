//! Terminal output to inline-styled HTML
//!
//! Escape sequences are parsed with `vte`, which keeps partial escape
//! sequences across `feed` calls. A trailing partial UTF-8 character is held
//! back by the converter and only handed to the parser once complete. A styled `<span>` is only
//! opened right before the first character printed in that style and is closed
//! when the style changes or on `finish`, so feeding a stream in any number of
//! pieces yields exactly the markup of a one-shot `convert`.

use std::fmt::Write;

use vte::{Params, Parser, Perform};

/// xterm's 16 base colors
const BASE_COLORS: [&str; 16] = [
    "#000000", "#cd0000", "#00cd00", "#cdcd00", "#0000ee", "#cd00cd", "#00cdcd", "#e5e5e5",
    "#7f7f7f", "#ff0000", "#00ff00", "#ffff00", "#5c5cff", "#ff00ff", "#00ffff", "#ffffff",
];

/// Channel levels of the 6x6x6 color cube (indices 16..=231)
const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    fn css(self) -> String {
        match self {
            Color::Indexed(n) if n < 16 => BASE_COLORS[n as usize].to_string(),
            Color::Indexed(n) if n < 232 => {
                let n = n - 16;
                let r = CUBE_LEVELS[(n / 36) as usize];
                let g = CUBE_LEVELS[((n / 6) % 6) as usize];
                let b = CUBE_LEVELS[(n % 6) as usize];
                format!("#{:02x}{:02x}{:02x}", r, g, b)
            }
            Color::Indexed(n) => {
                let level = 8 + 10 * (n - 232);
                format!("#{:02x}{:02x}{:02x}", level, level, level)
            }
            Color::Rgb(r, g, b) => format!("#{:02x}{:02x}{:02x}", r, g, b),
        }
    }
}

/// Graphic rendition state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Style {
    fg: Option<Color>,
    bg: Option<Color>,
    bold: bool,
    dim: bool,
    italic: bool,
    underline: bool,
    inverse: bool,
    hidden: bool,
    strike: bool,
}

impl Style {
    fn is_default(&self) -> bool {
        *self == Style::default()
    }

    fn css(&self) -> String {
        let (fg, bg) = if self.inverse {
            (
                Some(self.bg.unwrap_or(Color::Indexed(0))),
                Some(self.fg.unwrap_or(Color::Indexed(7))),
            )
        } else {
            (self.fg, self.bg)
        };

        let mut decls = Vec::new();
        if let Some(fg) = fg {
            decls.push(format!("color: {}", fg.css()));
        }
        if let Some(bg) = bg {
            decls.push(format!("background-color: {}", bg.css()));
        }
        if self.bold {
            decls.push("font-weight: bold".to_string());
        }
        if self.dim {
            decls.push("opacity: 0.5".to_string());
        }
        if self.italic {
            decls.push("font-style: italic".to_string());
        }
        match (self.underline, self.strike) {
            (true, true) => decls.push("text-decoration: underline line-through".to_string()),
            (true, false) => decls.push("text-decoration: underline".to_string()),
            (false, true) => decls.push("text-decoration: line-through".to_string()),
            (false, false) => {}
        }
        if self.hidden {
            decls.push("visibility: hidden".to_string());
        }
        decls.join("; ")
    }

    /// Apply one SGR sequence
    fn apply_sgr(&mut self, params: &Params) {
        let params: Vec<&[u16]> = params.iter().collect();
        if params.is_empty() {
            *self = Style::default();
            return;
        }

        let mut i = 0;
        while i < params.len() {
            let param = params[i];
            match param[0] {
                0 => *self = Style::default(),
                1 => self.bold = true,
                2 => self.dim = true,
                3 => self.italic = true,
                4 | 21 => self.underline = true,
                5 | 6 | 25 => {} // blink
                7 => self.inverse = true,
                8 => self.hidden = true,
                9 => self.strike = true,
                22 => {
                    self.bold = false;
                    self.dim = false;
                }
                23 => self.italic = false,
                24 => self.underline = false,
                27 => self.inverse = false,
                28 => self.hidden = false,
                29 => self.strike = false,
                n @ 30..=37 => self.fg = Some(Color::Indexed((n - 30) as u8)),
                39 => self.fg = None,
                n @ 40..=47 => self.bg = Some(Color::Indexed((n - 40) as u8)),
                49 => self.bg = None,
                n @ 90..=97 => self.fg = Some(Color::Indexed((n - 90 + 8) as u8)),
                n @ 100..=107 => self.bg = Some(Color::Indexed((n - 100 + 8) as u8)),
                target @ (38 | 48) => {
                    let (color, consumed) = if param.len() > 1 {
                        // Colon form: 38:5:n or 38:2[:cs]:r:g:b
                        (extended_color(&param[1..]), 0)
                    } else {
                        // Semicolon form: the color spec follows as separate params
                        let rest: Vec<u16> = params[i + 1..].iter().map(|p| p[0]).collect();
                        extended_color_flat(&rest)
                    };
                    i += consumed;
                    if let Some(color) = color {
                        if target == 38 {
                            self.fg = Some(color);
                        } else {
                            self.bg = Some(color);
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

fn clamp(v: u16) -> u8 {
    v.min(255) as u8
}

/// `5:n`, `2:r:g:b` or `2:cs:r:g:b`
fn extended_color(spec: &[u16]) -> Option<Color> {
    match spec {
        [5, n, ..] => Some(Color::Indexed(clamp(*n))),
        [2, _, r, g, b, ..] => Some(Color::Rgb(clamp(*r), clamp(*g), clamp(*b))),
        [2, r, g, b] => Some(Color::Rgb(clamp(*r), clamp(*g), clamp(*b))),
        _ => None,
    }
}

/// Same as `extended_color` for `;`-separated params; also reports how many
/// params were consumed
fn extended_color_flat(rest: &[u16]) -> (Option<Color>, usize) {
    match rest {
        [5, n, ..] => (Some(Color::Indexed(clamp(*n))), 2),
        [2, r, g, b, ..] => (Some(Color::Rgb(clamp(*r), clamp(*g), clamp(*b))), 4),
        [_, ..] => (None, 1),
        [] => (None, 0),
    }
}

/// Builds the markup as `vte` reports events
#[derive(Default)]
struct MarkupSink {
    out: String,
    style: Style,
    /// Style of the span currently open in `out`
    open: Option<Style>,
}

impl MarkupSink {
    fn emit(&mut self, c: char) {
        if self.open != Some(self.style) {
            self.close_span();
            if !self.style.is_default() {
                let _ = write!(self.out, "<span style=\"{}\">", self.style.css());
                self.open = Some(self.style);
            }
        }
        push_escaped(&mut self.out, c);
    }

    fn close_span(&mut self) {
        if self.open.take().is_some() {
            self.out.push_str("</span>");
        }
    }
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        '\'' => out.push_str("&#x27;"),
        c => out.push(c),
    }
}

/// Escape text for inclusion in HTML
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

impl Perform for MarkupSink {
    fn print(&mut self, c: char) {
        self.emit(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.emit('\n'),
            b'\t' => self.emit('\t'),
            // \r, bell, backspace and the rest have no markup equivalent
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if action == 'm' && intermediates.is_empty() && !ignore {
            self.style.apply_sgr(params);
        }
    }
}

/// Stateful converter for one output stream
pub struct AnsiToMarkupConverter {
    parser: Parser,
    sink: MarkupSink,
    /// Leading bytes of a UTF-8 character cut off at the end of the last feed
    partial: Vec<u8>,
}

impl AnsiToMarkupConverter {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            sink: MarkupSink::default(),
            partial: Vec::new(),
        }
    }

    /// Convert the next piece of the stream. Incomplete escape sequences and
    /// UTF-8 characters are held back until the rest arrives.
    pub fn feed(&mut self, data: &[u8]) -> String {
        let joined;
        let bytes: &[u8] = if self.partial.is_empty() {
            data
        } else {
            let mut buf = std::mem::take(&mut self.partial);
            buf.extend_from_slice(data);
            joined = buf;
            &joined
        };

        let (ready, rest) = bytes.split_at(bytes.len() - incomplete_utf8_tail(bytes));
        self.parser.advance(&mut self.sink, ready);
        self.partial = rest.to_vec();
        std::mem::take(&mut self.sink.out)
    }

    /// Close any open span. Text fed afterwards starts a fresh span.
    pub fn finish(&mut self) -> String {
        // A character still cut off here never completes
        let partial = std::mem::take(&mut self.partial);
        self.parser.advance(&mut self.sink, &partial);
        self.sink.close_span();
        std::mem::take(&mut self.sink.out)
    }

    /// One-shot conversion of a complete buffer
    pub fn convert(data: &[u8]) -> String {
        let mut converter = Self::new();
        let mut out = converter.feed(data);
        out.push_str(&converter.finish());
        out
    }
}

/// Length of an unfinished UTF-8 sequence at the end of `data`, 0 if none
fn incomplete_utf8_tail(data: &[u8]) -> usize {
    let start = data.len().saturating_sub(3);
    for i in (start..data.len()).rev() {
        let needed = match data[i] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => return 0,
        };
        let have = data.len() - i;
        return if have < needed { have } else { 0 };
    }
    0
}

impl Default for AnsiToMarkupConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_escaped() {
        assert_eq!(
            AnsiToMarkupConverter::convert(b"a < b && \"c\" > 'd'\n"),
            "a &lt; b &amp;&amp; &quot;c&quot; &gt; &#x27;d&#x27;\n"
        );
    }

    #[test]
    fn test_basic_colors() {
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[31mred\x1b[0m plain"),
            "<span style=\"color: #cd0000\">red</span> plain"
        );
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[1;94;42mhi"),
            "<span style=\"color: #5c5cff; background-color: #00cd00; font-weight: bold\">hi</span>"
        );
    }

    #[test]
    fn test_extended_colors() {
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[38;5;196mx"),
            "<span style=\"color: #ff0000\">x</span>"
        );
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[48;5;244mx"),
            "<span style=\"background-color: #808080\">x</span>"
        );
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[38;2;1;2;3mx"),
            "<span style=\"color: #010203\">x</span>"
        );
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[38:2::10:20:30mx"),
            "<span style=\"color: #0a141e\">x</span>"
        );
    }

    #[test]
    fn test_attribute_resets() {
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[1;4mab\x1b[22mc\x1b[24md"),
            "<span style=\"font-weight: bold; text-decoration: underline\">ab</span>\
             <span style=\"text-decoration: underline\">c</span>d"
        );
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[7mx\x1b[27my"),
            "<span style=\"color: #000000; background-color: #e5e5e5\">x</span>y"
        );
    }

    #[test]
    fn test_style_without_text_emits_nothing() {
        assert_eq!(AnsiToMarkupConverter::convert(b"\x1b[32m\x1b[0m"), "");
        assert_eq!(AnsiToMarkupConverter::convert(b"ok\x1b[33m"), "ok");
    }

    #[test]
    fn test_unknown_sequences_are_stripped() {
        let input = b"\x1b[2J\x1b[H\x1b]0;title\x07\x1b(B\x1b[?25lready\r\n\x07";
        assert_eq!(AnsiToMarkupConverter::convert(input), "ready\n");
    }

    #[test]
    fn test_tabs_and_newlines_kept_in_span() {
        assert_eq!(
            AnsiToMarkupConverter::convert(b"\x1b[36ma\tb\nc\x1b[m"),
            "<span style=\"color: #00cdcd\">a\tb\nc</span>"
        );
    }

    #[test]
    fn test_chunked_equals_one_shot_at_every_split() {
        let input = "\x1b[1;31mError:\x1b[0m disk \x1b[38;5;208m95%\x1b[0m full → ünïcödé ✓\r\n\x1b[4mdone\x1b[24m <ok>\n"
            .as_bytes();
        let expected = AnsiToMarkupConverter::convert(input);

        for split in 0..=input.len() {
            let mut converter = AnsiToMarkupConverter::new();
            let mut out = converter.feed(&input[..split]);
            out.push_str(&converter.feed(&input[split..]));
            out.push_str(&converter.finish());
            assert_eq!(out, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_split_character_followed_by_more_text() {
        let mut converter = AnsiToMarkupConverter::new();
        let mut out = converter.feed(b"gr\xc3");
        assert_eq!(out, "gr");
        out.push_str(&converter.feed(b"\xbcn\xc3\xaf\n"));
        out.push_str(&converter.finish());
        assert_eq!(out, "grünï\n");
    }

    #[test]
    fn test_incomplete_utf8_tail() {
        assert_eq!(incomplete_utf8_tail(b"abc"), 0);
        assert_eq!(incomplete_utf8_tail(b"ab\xc3"), 1);
        assert_eq!(incomplete_utf8_tail("ü".as_bytes()), 0);
        assert_eq!(incomplete_utf8_tail(b"\xe2\x9c"), 2);
        assert_eq!(incomplete_utf8_tail(b"x\xf0\x9f\x98"), 3);
        assert_eq!(incomplete_utf8_tail("😀".as_bytes()), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = b"\x1b[32mgreen\x1b[0m and \x1b[38;2;255;128;0morange\x1b[0m";
        let mut converter = AnsiToMarkupConverter::new();
        let mut out = String::new();
        for byte in input {
            out.push_str(&converter.feed(std::slice::from_ref(byte)));
        }
        out.push_str(&converter.finish());
        assert_eq!(out, AnsiToMarkupConverter::convert(input));
    }
}
