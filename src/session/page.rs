//! Page math, text splitting and page rendering.

use crate::chat::{Embed, EmbedField, Render};
use crate::consts::{EMBED_COLOUR, HELP_HINT, HELP_INTRO, HELP_WELCOME, help_footer};

use super::action::TRIGGER_TABLE;

/// Compute the number of pages for a paginated list.
pub fn total_pages(item_count: usize, per_page: usize) -> usize {
    item_count.div_ceil(per_page.max(1))
}

/// Return start/end indices for a 1-based page window.
pub fn page_window(total_items: usize, per_page: usize, page: usize) -> (usize, usize) {
    let safe_per_page = per_page.max(1);
    let start = page.saturating_sub(1).saturating_mul(safe_per_page);
    let end = start.saturating_add(safe_per_page).min(total_items);
    (start.min(total_items), end)
}

/// One paginated item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Line(String),
    Field { name: String, value: String },
}

/// How a page is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Numbered lines in an embed description.
    List,
    /// One embed field per entry.
    Fields,
    /// A pre-chunked block of text sent as plain content.
    Text,
}

/// Presentation knobs shared by every page of a session.
#[derive(Debug, Clone)]
pub struct PageStyle {
    pub title: Option<String>,
    pub show_entry_count: bool,
}

impl Default for PageStyle {
    fn default() -> Self {
        Self {
            title: None,
            show_entry_count: true,
        }
    }
}

/// An immutable, 1-indexed sequence of pages.
#[derive(Debug, Clone)]
pub struct Pages {
    entries: Vec<Entry>,
    per_page: usize,
    kind: PageKind,
}

impl Pages {
    pub fn list(entries: impl IntoIterator<Item = impl Into<String>>, per_page: usize) -> Self {
        Self {
            entries: entries.into_iter().map(|e| Entry::Line(e.into())).collect(),
            per_page: per_page.max(1),
            kind: PageKind::List,
        }
    }

    pub fn fields(entries: impl IntoIterator<Item = (String, String)>, per_page: usize) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, value)| Entry::Field { name, value })
                .collect(),
            per_page: per_page.max(1),
            kind: PageKind::Fields,
        }
    }

    /// Split `text` into pages of at most `max_size` characters, each wrapped
    /// in `prefix` and `suffix` (typically a code fence).
    pub fn text(text: &str, prefix: &str, suffix: &str, max_size: usize) -> Self {
        Self {
            entries: split_text(text, prefix, suffix, max_size)
                .into_iter()
                .map(Entry::Line)
                .collect(),
            per_page: 1,
            kind: PageKind::Text,
        }
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    pub fn per_page(&self) -> usize {
        self.per_page
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn maximum_pages(&self) -> usize {
        total_pages(self.entries.len(), self.per_page)
    }

    /// Entries on 1-based page `page`. Out-of-range pages are empty.
    pub fn get_page(&self, page: usize) -> &[Entry] {
        if page == 0 {
            return &[];
        }
        let (start, end) = page_window(self.entries.len(), self.per_page, page);
        &self.entries[start..end]
    }

    /// Whether rendering these pages needs rich (embed) output.
    pub fn needs_rich_render(&self) -> bool {
        self.kind != PageKind::Text
    }

    /// Build the render for `page`. `first` marks the render that creates the surface.
    pub fn render(&self, page: usize, first: bool, paginating: bool, style: &PageStyle) -> Render {
        let entries = self.get_page(page);
        let maximum = self.maximum_pages();

        match self.kind {
            PageKind::Text => {
                let chunk = entries
                    .iter()
                    .map(entry_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                if maximum > 1 {
                    Render::text(format!("{chunk}\nPage {page}/{maximum}"))
                } else {
                    Render::text(chunk)
                }
            }
            PageKind::List => {
                let offset = (page.saturating_sub(1)) * self.per_page;
                let mut lines: Vec<String> = entries
                    .iter()
                    .enumerate()
                    .map(|(i, entry)| format!("{}. {}", offset + i + 1, entry_text(entry)))
                    .collect();

                if paginating && first {
                    lines.push(String::new());
                    lines.push(HELP_HINT.to_string());
                }

                Render::embed(Embed {
                    title: style.title.clone(),
                    description: Some(lines.join("\n")),
                    fields: Vec::new(),
                    footer: self.footer(page, style),
                    colour: EMBED_COLOUR,
                })
            }
            PageKind::Fields => Render::embed(Embed {
                title: style.title.clone(),
                description: None,
                fields: entries
                    .iter()
                    .map(|entry| match entry {
                        Entry::Field { name, value } => EmbedField {
                            name: name.clone(),
                            value: value.clone(),
                        },
                        Entry::Line(line) => EmbedField {
                            name: line.clone(),
                            value: String::new(),
                        },
                    })
                    .collect(),
                footer: self.footer(page, style),
                colour: EMBED_COLOUR,
            }),
        }
    }

    /// The static help render listing every trigger.
    pub fn help_render(&self, current_page: usize, style: &PageStyle) -> Render {
        let mut lines = vec![HELP_WELCOME.to_string(), HELP_INTRO.to_string()];
        for (symbol, action) in TRIGGER_TABLE {
            lines.push(format!("{symbol} {}", action.description()));
        }

        match self.kind {
            PageKind::Text => {
                lines.push(String::new());
                lines.push(help_footer(current_page));
                Render::text(lines.join("\n"))
            }
            PageKind::List | PageKind::Fields => Render::embed(Embed {
                title: style.title.clone(),
                description: Some(lines.join("\n")),
                fields: Vec::new(),
                footer: Some(help_footer(current_page)),
                colour: EMBED_COLOUR,
            }),
        }
    }

    fn footer(&self, page: usize, style: &PageStyle) -> Option<String> {
        let maximum = self.maximum_pages();
        if maximum <= 1 {
            return None;
        }
        if style.show_entry_count {
            Some(format!(
                "Page {page}/{maximum} ({} entries)",
                self.entries.len()
            ))
        } else {
            Some(format!("Page {page}/{maximum}"))
        }
    }
}

fn entry_text(entry: &Entry) -> String {
    match entry {
        Entry::Line(line) => line.clone(),
        Entry::Field { name, value } => format!("{name}: {value}"),
    }
}

/// Greedy word wrap. Words longer than `width` are hard-split.
pub fn wrap_line(line: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in line.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > width {
            if current_len > 0 {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            out.push(word.into_iter().collect());
            word = rest;
        }

        let needed = if current_len == 0 {
            word.len()
        } else {
            current_len + 1 + word.len()
        };
        if needed > width {
            out.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    if current_len > 0 {
        out.push(current);
    }
    out
}

/// Pack lines of `text` into chunks that fit `max_size` with prefix and suffix.
pub fn split_text(text: &str, prefix: &str, suffix: &str, max_size: usize) -> Vec<String> {
    let prefix_len = prefix.chars().count();
    let suffix_len = suffix.chars().count();
    let width = max_size.saturating_sub(prefix_len + suffix_len + 2).max(1);
    let limit = max_size.saturating_sub(suffix_len);

    let mut pages = Vec::new();
    let mut current: Vec<String> = vec![prefix.to_string()];
    let mut count = prefix_len + 1;

    let mut close = |current: &mut Vec<String>, count: &mut usize| {
        current.push(suffix.to_string());
        pages.push(current.join("\n"));
        *current = vec![prefix.to_string()];
        *count = prefix_len + 1;
    };

    for raw in text.split('\n') {
        let pieces = if raw.chars().count() > width {
            wrap_line(raw, width)
        } else {
            vec![raw.to_string()]
        };

        for line in pieces {
            let line_len = line.chars().count();
            if count + line_len + 1 > limit && current.len() > 1 {
                close(&mut current, &mut count);
            }
            count += line_len + 1;
            current.push(line);
        }
    }

    if current.len() > 1 {
        close(&mut current, &mut count);
    }
    pages
}
