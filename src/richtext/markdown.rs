use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

use super::field::TextStyle;
use super::styled::{SpanStyle, StyledLine, StyledSpan, StyledText};

/// Pure markdown-to-styled-text conversion
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str, style: TextStyle) -> StyledText;
}

/// Default renderer built on pulldown-cmark
#[derive(Debug, Default, Clone, Copy)]
pub struct PulldownRenderer;

impl MarkdownRenderer for PulldownRenderer {
    fn render(&self, markdown: &str, style: TextStyle) -> StyledText {
        render_markdown(markdown, style)
    }
}

fn heading_depth(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Convert markdown to styled lines.
///
/// Headline-styled fields render every span bold; callouts render italic.
/// Paragraphs are separated by a blank line, trailing blank lines are dropped.
pub fn render_markdown(md: &str, text_style: TextStyle) -> StyledText {
    let parser = Parser::new(md);
    let mut lines: Vec<StyledLine> = Vec::with_capacity(md.lines().count());
    let mut current: Vec<StyledSpan> = Vec::with_capacity(4);
    let mut in_code_block = false;
    let mut heading: Option<u8> = None;
    let mut emphasis = 0usize;
    let mut strong = 0usize;
    let mut link: Option<String> = None;

    let base = SpanStyle {
        bold: text_style == TextStyle::Headline,
        italic: text_style == TextStyle::Callout,
        ..SpanStyle::default()
    };

    let flush = |lines: &mut Vec<StyledLine>, current: &mut Vec<StyledSpan>| {
        if !current.is_empty() {
            lines.push(StyledLine {
                spans: std::mem::take(current),
            });
        }
    };

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading = Some(heading_depth(level));
            }
            Event::End(TagEnd::Heading(_)) => {
                flush(&mut lines, &mut current);
                heading = None;
            }
            Event::End(TagEnd::Paragraph) => {
                flush(&mut lines, &mut current);
                lines.push(StyledLine::default());
            }
            Event::Start(Tag::CodeBlock(_)) => {
                in_code_block = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                flush(&mut lines, &mut current);
                in_code_block = false;
                lines.push(StyledLine::default());
            }
            Event::Start(Tag::Item) => {
                current.push(StyledSpan::styled("• ", base.clone()));
            }
            Event::End(TagEnd::Item) => {
                flush(&mut lines, &mut current);
            }
            Event::Start(Tag::Emphasis) => emphasis += 1,
            Event::End(TagEnd::Emphasis) => emphasis = emphasis.saturating_sub(1),
            Event::Start(Tag::Strong) => strong += 1,
            Event::End(TagEnd::Strong) => strong = strong.saturating_sub(1),
            Event::Start(Tag::Link { dest_url, .. }) => {
                link = Some(dest_url.into_string());
            }
            Event::End(TagEnd::Link) => {
                link = None;
            }
            Event::Start(Tag::Image { dest_url, .. }) => {
                current.push(StyledSpan::styled(
                    format!("[Image: {dest_url}]"),
                    SpanStyle {
                        link: Some(dest_url.into_string()),
                        ..base.clone()
                    },
                ));
            }
            Event::Text(text) => {
                if in_code_block {
                    // Code blocks keep their own line structure
                    for code_line in text.lines() {
                        lines.push(StyledLine {
                            spans: vec![StyledSpan::styled(
                                code_line,
                                SpanStyle {
                                    code: true,
                                    ..SpanStyle::default()
                                },
                            )],
                        });
                    }
                    continue;
                }
                let style = SpanStyle {
                    bold: base.bold || strong > 0 || heading.is_some(),
                    italic: base.italic || emphasis > 0,
                    code: false,
                    heading,
                    link: link.clone(),
                };
                current.push(StyledSpan::styled(text.into_string(), style));
            }
            Event::Code(code) => {
                current.push(StyledSpan::styled(
                    code.into_string(),
                    SpanStyle {
                        code: true,
                        link: link.clone(),
                        ..base.clone()
                    },
                ));
            }
            Event::SoftBreak => {
                current.push(StyledSpan::styled(" ", base.clone()));
            }
            Event::HardBreak => {
                flush(&mut lines, &mut current);
            }
            _ => {}
        }
    }

    flush(&mut lines, &mut current);

    while lines.last().is_some_and(|line| line.spans.is_empty()) {
        lines.pop();
    }

    StyledText { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_plain_text() {
        let text = render_markdown("Hello world", TextStyle::Body);
        assert_eq!(text.plain_text(), "Hello world");
        assert_eq!(text.lines.len(), 1);
    }

    #[test]
    fn test_render_empty() {
        let text = render_markdown("", TextStyle::Body);
        assert!(text.lines.is_empty());
        assert!(text.is_empty());
    }

    #[test]
    fn test_render_bold_and_italic() {
        let text = render_markdown("plain **bold** and *italic*", TextStyle::Body);
        let spans = &text.lines[0].spans;
        let bold = spans.iter().find(|s| s.text == "bold").unwrap();
        assert!(bold.style.bold);
        assert!(!bold.style.italic);
        let italic = spans.iter().find(|s| s.text == "italic").unwrap();
        assert!(italic.style.italic);
        assert!(!spans[0].style.bold);
    }

    #[test]
    fn test_render_heading_level() {
        let text = render_markdown("## Section\n\nBody text", TextStyle::Body);
        assert_eq!(text.lines[0].spans[0].style.heading, Some(2));
        assert!(text.lines[0].spans[0].style.bold);
        assert_eq!(text.plain_text(), "Section\nBody text");
    }

    #[test]
    fn test_render_link_target() {
        let text = render_markdown("[docs](https://example.com)", TextStyle::Body);
        let span = &text.lines[0].spans[0];
        assert_eq!(span.text, "docs");
        assert_eq!(span.style.link.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_render_code_block_lines() {
        let text = render_markdown("```\nlet a = 1;\nlet b = 2;\n```", TextStyle::Body);
        assert_eq!(text.lines.len(), 2);
        assert!(text.lines.iter().all(|l| l.spans[0].style.code));
    }

    #[test]
    fn test_headline_style_is_bold() {
        let text = render_markdown("Breaking news", TextStyle::Headline);
        assert!(text.lines[0].spans[0].style.bold);
        let callout = render_markdown("Aside", TextStyle::Callout);
        assert!(callout.lines[0].spans[0].style.italic);
    }

    #[test]
    fn test_render_list_items() {
        let text = render_markdown("- one\n- two", TextStyle::Body);
        assert_eq!(text.plain_text(), "• one\n• two");
    }

    #[test]
    fn test_render_unicode() {
        let text = render_markdown("Hello 世界 🌍", TextStyle::Body);
        assert_eq!(text.plain_text(), "Hello 世界 🌍");
    }
}
