use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_local;
use crate::identity::Identity;
use crate::item::{Category, Item};
use crate::theme::Theme;
use crate::view::ViewFilter;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
    theme: Theme,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz, theme: Theme) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            tz,
            theme,
        })
    }

    #[cfg(test)]
    fn plain(tz: Tz) -> Self {
        Self {
            color: false,
            tz,
            theme: Theme::default(),
        }
    }

    #[tracing::instrument(skip(self, items))]
    pub fn print_items(&self, items: &[Item], filter: &ViewFilter, loading: bool) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_items(&mut out, items, filter, loading)
    }

    pub fn write_items<W: Write>(
        &self,
        mut out: W,
        items: &[Item],
        filter: &ViewFilter,
        loading: bool,
    ) -> anyhow::Result<()> {
        let heading = format!(
            "Events: {} / {}{}",
            filter.mode,
            filter.category,
            if loading { " (Loading...)" } else { "" }
        );
        writeln!(out, "{}", self.paint(&heading, self.theme.accent()))?;

        if items.is_empty() {
            if !loading {
                writeln!(out, "No events")?;
            }
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Due".to_string(),
            "Type".to_string(),
            "Title".to_string(),
        ];

        let rows = items
            .iter()
            .map(|item| {
                let done = if item.completed { "[x]" } else { "[ ]" };
                let title = if item.completed {
                    self.paint(item.title.as_str(), "2;9")
                } else {
                    item.title.to_string()
                };
                vec![
                    self.paint(item.short_id(), "33"),
                    done.to_string(),
                    format_local(item.due_at, &self.tz),
                    self.paint(&item.category.as_str().to_uppercase(), badge_color(item.category)),
                    title,
                ]
            })
            .collect();

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    pub fn print_identity(&self, identity: Option<&Identity>, store: &str) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        match identity {
            Some(identity) => writeln!(
                out,
                "Logged in as {} ({store} store)",
                self.paint(identity.display_name(), "1")
            )?,
            None => writeln!(out, "Not signed in ({store} store)")?,
        }
        Ok(())
    }

    pub fn print_themes(&self, current: Theme) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        for theme in Theme::SELECTABLE {
            let marker = if theme == current { "*" } else { " " };
            writeln!(out, "{marker} {:<14} {:<16} {}", theme.id(), theme.label(), theme.hint())?;
        }
        if !Theme::SELECTABLE.contains(&current) {
            writeln!(out, "* {:<14} {:<16} {}", current.id(), current.label(), current.hint())?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn badge_color(category: Category) -> &'static str {
    match category {
        Category::Work => "34",
        Category::Life => "32",
        Category::Pet => "35",
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
