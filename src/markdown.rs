use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};

/// Rich-text segment boundary for code blocks (spec.md §4.3).
pub const CODE_CHUNK_LIMIT: usize = 1800;

/// Extension → language tag, for files pushed as a single code block.
pub const CODE_LANGUAGE_TABLE: &[(&str, &str)] = &[
    ("py", "python"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("json", "json"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("sh", "shell"),
    ("html", "html"),
    ("css", "css"),
    ("java", "java"),
    ("cpp", "c++"),
    ("c", "c"),
    ("go", "go"),
    ("rs", "rust"),
    ("rb", "ruby"),
    ("php", "php"),
    ("sql", "sql"),
    ("xml", "xml"),
];

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "svg", "webp", "ico", "tiff", "tif",
];

pub fn code_language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    CODE_LANGUAGE_TABLE
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

pub fn is_image_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading1(String),
    Heading2(String),
    Heading3(String),
    Paragraph(String),
    BulletedListItem { text: String, depth: usize },
    NumberedListItem { text: String, depth: usize },
    ToDo { text: String, checked: bool, depth: usize },
    Quote(String),
    Code { language: String, segments: Vec<String> },
    Table { header: Vec<String>, rows: Vec<Vec<String>> },
    Image { url: String, alt: String },
}

/// Splits `content` into consecutive rich-text segments of at most
/// `CODE_CHUNK_LIMIT` chars, preserving byte order (spec.md §4.3).
pub fn chunk_code(content: &str) -> Vec<String> {
    if content.is_empty() {
        return vec![String::new()];
    }
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(CODE_CHUNK_LIMIT)
        .map(|c| c.iter().collect())
        .collect()
}

/// Wraps a whole code file's content as a single code block (spec.md §4.3
/// code-file handling), chunked into rich-text segments.
pub fn code_file_to_blocks(content: &str, language: &str) -> Vec<Block> {
    vec![Block::Code {
        language: language.to_string(),
        segments: chunk_code(content),
    }]
}

/// Parses Markdown (CommonMark + fenced code + GFM tables) into blocks.
pub fn markdown_to_blocks(text: &str) -> Vec<Block> {
    let options = pulldown_cmark::Options::ENABLE_TABLES;
    let parser = Parser::new_ext(text, options);
    let mut blocks = Vec::new();
    let mut events = parser.peekable();

    while let Some(event) = events.next() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                let inline = collect_inline_until(&mut events, |e| {
                    matches!(e, Event::End(TagEnd::Heading(_)))
                });
                blocks.push(match level {
                    HeadingLevel::H1 => Block::Heading1(inline),
                    HeadingLevel::H2 => Block::Heading2(inline),
                    _ => Block::Heading3(inline),
                });
            }
            Event::Start(Tag::Paragraph) => {
                let inline = collect_inline_until(&mut events, |e| {
                    matches!(e, Event::End(TagEnd::Paragraph))
                });
                if let Some((url, alt)) = parse_sole_image(&inline) {
                    blocks.push(Block::Image { url, alt });
                } else if let Some((text, checked)) = parse_todo_text(&inline) {
                    blocks.push(Block::ToDo { text, checked, depth: 0 });
                } else {
                    blocks.push(Block::Paragraph(inline));
                }
            }
            Event::Start(Tag::BlockQuote(_)) => {
                let inline = collect_inline_until(&mut events, |e| {
                    matches!(e, Event::End(TagEnd::BlockQuote(_)))
                });
                blocks.push(Block::Quote(inline.trim().to_string()));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match &kind {
                    CodeBlockKind::Fenced(lang) => lang.to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                let mut content = String::new();
                for e in events.by_ref() {
                    match e {
                        Event::Text(t) => content.push_str(&t),
                        Event::End(TagEnd::CodeBlock) => break,
                        _ => {}
                    }
                }
                blocks.push(Block::Code {
                    language,
                    segments: chunk_code(&content),
                });
            }
            Event::Start(Tag::List(start)) => {
                collect_list(&mut events, start.is_some(), 0, &mut blocks);
            }
            Event::Start(Tag::Table(_)) => {
                let (header, rows) = collect_table(&mut events);
                blocks.push(Block::Table { header, rows });
            }
            _ => {}
        }
    }
    blocks
}

/// Walks a `List` of `Item`s, nesting 2 spaces per level (spec.md §4.3).
/// A nested `Start(List)` encountered mid-item recurses at `depth + 1`.
fn collect_list<'a>(
    events: &mut std::iter::Peekable<impl Iterator<Item = Event<'a>>>,
    ordered: bool,
    depth: usize,
    out: &mut Vec<Block>,
) {
    while let Some(event) = events.next() {
        match event {
            Event::End(TagEnd::List(_)) => break,
            Event::Start(Tag::Item) => {
                let mut text = String::new();
                loop {
                    match events.peek() {
                        Some(Event::Start(Tag::List(nested_start))) => {
                            let ordered_nested = nested_start.is_some();
                            events.next();
                            collect_list(events, ordered_nested, depth + 1, out);
                        }
                        Some(Event::End(TagEnd::Item)) => {
                            events.next();
                            break;
                        }
                        Some(_) => {
                            let e = events.next().unwrap();
                            push_inline_event(&mut text, &e);
                        }
                        None => break,
                    }
                }
                let trimmed = text.trim().to_string();
                if let Some((todo_text, checked)) = parse_todo_text(&trimmed) {
                    out.push(Block::ToDo { text: todo_text, checked, depth });
                } else if ordered {
                    out.push(Block::NumberedListItem { text: trimmed, depth });
                } else {
                    out.push(Block::BulletedListItem { text: trimmed, depth });
                }
            }
            _ => {}
        }
    }
}

/// Block kinds rendered as bare text lines with no leading marker of their
/// own (no `#`, `-`, `` ``` ``). Two of these placed back to back would be
/// read by CommonMark as a continuation of the same block, so a blank line
/// must separate consecutive pairs from this set.
fn is_plain_text_block(block: &Block) -> bool {
    matches!(
        block,
        Block::Paragraph(_) | Block::Quote(_) | Block::Image { .. } | Block::Table { .. }
    )
}

/// Renders blocks back to Markdown; emission is hand-written and
/// deterministic so equal block sequences always produce byte-identical
/// text (required for hash-based change detection). A blank line is
/// inserted between two consecutive blocks only where CommonMark would
/// otherwise merge them (spec.md §4.3); list items, headings, and code
/// fences are self-delimiting and never get one, even back to back.
pub fn blocks_to_markdown(blocks: &[Block]) -> String {
    let mut out = String::new();
    let mut prev_plain = false;
    for block in blocks {
        let this_plain = is_plain_text_block(block);
        if prev_plain && this_plain {
            out.push('\n');
        }
        match block {
            Block::Heading1(t) => out.push_str(&format!("# {t}\n")),
            Block::Heading2(t) => out.push_str(&format!("## {t}\n")),
            Block::Heading3(t) => out.push_str(&format!("### {t}\n")),
            Block::Paragraph(t) => out.push_str(&format!("{t}\n")),
            Block::BulletedListItem { text, depth } => {
                out.push_str(&"  ".repeat(*depth));
                out.push_str(&format!("- {text}\n"));
            }
            Block::NumberedListItem { text, depth } => {
                out.push_str(&"  ".repeat(*depth));
                out.push_str(&format!("1. {text}\n"));
            }
            Block::ToDo { text, checked, depth } => {
                out.push_str(&"  ".repeat(*depth));
                let mark = if *checked { "x" } else { " " };
                out.push_str(&format!("- [{mark}] {text}\n"));
            }
            Block::Quote(t) => {
                for line in t.lines() {
                    out.push_str(&format!("> {line}\n"));
                }
            }
            Block::Code { language, segments } => {
                out.push_str(&format!("```{language}\n"));
                for segment in segments {
                    out.push_str(segment);
                }
                if !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("```\n");
            }
            Block::Table { header, rows } => {
                out.push_str("| ");
                out.push_str(&header.join(" | "));
                out.push_str(" |\n|");
                out.push_str(&" --- |".repeat(header.len()));
                out.push('\n');
                for row in rows {
                    out.push_str("| ");
                    out.push_str(&row.join(" | "));
                    out.push_str(" |\n");
                }
            }
            Block::Image { url, alt } => out.push_str(&format!("![{alt}]({url})\n")),
        }
        prev_plain = this_plain;
    }
    out
}

fn collect_inline_until<'a>(
    events: &mut std::iter::Peekable<impl Iterator<Item = Event<'a>>>,
    is_end: impl Fn(&Event<'a>) -> bool,
) -> String {
    let mut out = String::new();
    for e in events.by_ref() {
        if is_end(&e) {
            break;
        }
        push_inline_event(&mut out, &e);
    }
    out
}

fn push_inline_event<'a>(out: &mut String, event: &Event<'a>) {
    match event {
        Event::Text(t) => out.push_str(t),
        Event::Code(t) => {
            out.push('`');
            out.push_str(t);
            out.push('`');
        }
        Event::Start(Tag::Strong) => out.push_str("**"),
        Event::End(TagEnd::Strong) => out.push_str("**"),
        Event::Start(Tag::Emphasis) => out.push('*'),
        Event::End(TagEnd::Emphasis) => out.push('*'),
        Event::Start(Tag::Link { dest_url, .. }) => {
            out.push('[');
            // closed when the matching End(Link) text is known; handled below
            out.push_str(&format!("\u{0}{dest_url}\u{0}"));
        }
        Event::End(TagEnd::Link) => {
            if let Some(idx) = out.rfind('\u{0}') {
                let url_start = out[..idx].rfind('\u{0}').map(|i| i + 1).unwrap_or(idx);
                let url = out[url_start..idx].to_string();
                let text_start = out[..url_start].rfind('[').map(|i| i + 1).unwrap_or(url_start);
                let text = out[text_start..url_start - 1].to_string();
                out.truncate(text_start - 1);
                out.push_str(&format!("[{text}]({url})"));
            }
        }
        Event::SoftBreak => out.push(' '),
        Event::HardBreak => out.push('\n'),
        _ => {}
    }
}

fn parse_sole_image(inline: &str) -> Option<(String, String)> {
    let rest = inline.strip_prefix('!')?.strip_prefix('[')?;
    let (alt, rest) = rest.split_once(']')?;
    let url = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some((url.to_string(), alt.to_string()))
}

fn parse_todo_text(inline: &str) -> Option<(String, bool)> {
    if let Some(rest) = inline.strip_prefix("[ ] ") {
        Some((rest.to_string(), false))
    } else if let Some(rest) = inline.strip_prefix("[x] ").or_else(|| inline.strip_prefix("[X] ")) {
        Some((rest.to_string(), true))
    } else {
        None
    }
}

fn collect_table<'a>(
    events: &mut std::iter::Peekable<impl Iterator<Item = Event<'a>>>,
) -> (Vec<String>, Vec<Vec<String>>) {
    let mut header = Vec::new();
    let mut rows = Vec::new();
    let mut in_head = false;
    let mut current_row: Vec<String> = Vec::new();
    for e in events.by_ref() {
        match e {
            Event::Start(Tag::TableHead) => {
                in_head = true;
                current_row.clear();
            }
            Event::End(TagEnd::TableHead) => {
                header = std::mem::take(&mut current_row);
                in_head = false;
            }
            Event::Start(Tag::TableRow) => current_row.clear(),
            Event::End(TagEnd::TableRow) => {
                rows.push(std::mem::take(&mut current_row));
            }
            Event::Start(Tag::TableCell) => {}
            Event::End(TagEnd::TableCell) => {}
            Event::Text(t) => current_row.push(t.to_string()),
            Event::End(TagEnd::Table) => break,
            _ => {
                let _ = in_head;
            }
        }
    }
    (header, rows)
}
