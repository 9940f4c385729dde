//! HTML rendering of paper entries into the page template.
//!
//! The page template is plain HTML with two markers: `<!-- TIME -->` for the
//! "last updated" stamp and `<!-- ENTRIES -->` for the entry list. Each entry
//! is rendered through an autoescaping `tera` template.

use std::collections::HashMap;

use tera::{Context, Tera};

use paperdisc_shared::{PaperDiscError, PaperMeta, Result};

use crate::discussions::PaperEntry;

/// Marker replaced with the render time.
pub const TIME_MARKER: &str = "<!-- TIME -->";
/// Marker replaced with the rendered entries.
pub const ENTRIES_MARKER: &str = "<!-- ENTRIES -->";

/// Format of the render time.
pub const TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

/// The `.html` suffix turns autoescaping on.
const ENTRY_TEMPLATE_NAME: &str = "entry.html";

// Ids come out of `normalize_arxiv_id` and carry no markup, so they are
// emitted as-is to keep old-style `archive/number` paths intact.
const ENTRY_TEMPLATE: &str = r##"      <div class="t1 entry">
        <div class="t2 entry-links">
          <div class="t3 entry-id"><a href="https://arxiv.org/abs/{{ id | safe }}">{{ id | safe }}</a></div><div class="t3">[<a href="https://arxiv.org/pdf/{{ id | safe }}">pdf</a>][<a href="https://arxiv.org/html/{{ id | safe }}">html</a>]</div>
        </div>
        <div class="t2 entry-paper">
          <div class="t3 entry-title">{{ title | escape | linebreaksbr | safe }}</div>
          <div class="t3 entry-authors">{{ authors | join(sep=", ") }}{% if more_authors %} et al.{% endif %}</div>
        </div>
        <div class="t2 entry-control"><a class="t3" href="javascript:toggle('abs-{{ n }}')">📖</a><a class="t3" href="javascript:toggle('cm-{{ n }}')">💬</a></div>
        <div class="t2 entry-abstract hide" id="abs-{{ n }}">{{ summary | escape | linebreaksbr | safe }}</div>
        <div class="t2 entry-comments-all" id="cm-{{ n }}">
{% for c in comments %}          <div class="t3 entry-comments"><b>{{ c.name }}</b> ({{ c.date }}){% if c.text %}: {{ c.text | escape | linebreaksbr | safe }}{% endif %}</div>
{% endfor %}        </div>
      </div>"##;

fn template_err(e: tera::Error) -> PaperDiscError {
    PaperDiscError::parse(format!("entry template: {e}"))
}

fn entry_renderer() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_template(ENTRY_TEMPLATE_NAME, ENTRY_TEMPLATE)
        .map_err(template_err)?;
    Ok(tera)
}

/// Render one entry block. Papers without metadata render with empty title,
/// authors and abstract.
///
/// The toggle element ids use the entry's latest row id, which is unique per
/// page.
fn render_entry(tera: &Tera, entry: &PaperEntry, meta: Option<&PaperMeta>) -> Result<String> {
    let mut ctx = Context::new();
    ctx.insert("id", &entry.arxiv_id);
    ctx.insert("n", &entry.latest.0);
    ctx.insert("title", meta.map(|m| m.title.as_str()).unwrap_or(""));
    ctx.insert("authors", meta.map(|m| m.authors.as_slice()).unwrap_or(&[]));
    ctx.insert("more_authors", &meta.is_some_and(|m| m.has_more_authors));
    ctx.insert("summary", meta.map(|m| m.summary.as_str()).unwrap_or(""));
    ctx.insert("comments", &entry.comments);

    tera.render(ENTRY_TEMPLATE_NAME, &ctx).map_err(template_err)
}

/// Render every entry, newline separated.
pub fn render_entries(
    entries: &[PaperEntry],
    metadata: &HashMap<String, PaperMeta>,
) -> Result<String> {
    let tera = entry_renderer()?;
    let blocks = entries
        .iter()
        .map(|entry| render_entry(&tera, entry, metadata.get(&entry.arxiv_id)))
        .collect::<Result<Vec<_>>>()?;
    Ok(blocks.join("\n"))
}

/// Fill the template's markers.
pub fn build_page(
    template: &str,
    entries: &[PaperEntry],
    metadata: &HashMap<String, PaperMeta>,
    rendered_at: &str,
) -> Result<String> {
    let rendered = render_entries(entries, metadata)?;
    Ok(template
        .replace(TIME_MARKER, rendered_at)
        .replace(ENTRIES_MARKER, &rendered))
}
