//! Page extraction
//!
//! The `Extractor` trait is the site-specific seam: it turns a fetched page
//! into typed records plus the pages to fetch next. `SiteExtractor` is the
//! implementation for the configured catalog layout:
//! - Collection list: one record per list entry, plus its first item-list page
//! - Item list: a JSON payload `{total, data: [{id, title, url, date}]}`,
//!   or an HTML list when the payload is not JSON
//! - Item content: paragraphs of the content container

use crate::config::SiteConfig;
use crate::crawler::task::{FetchTask, FollowUp, PageTemplates, TaskKind, TaskParent};
use crate::storage::{CollectionRecord, ItemDetailRecord, ItemRecord, Record};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Errors that make a page unusable
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Malformed page: {0}")]
    Malformed(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid CSS selector: '{0}'")]
    Selector(String),
}

/// Records and follow-ups found on one page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub records: Vec<Record>,
    pub follow_ups: Vec<FollowUp>,
    /// Item total stated by an item-list page, when present
    pub declared_total: Option<u32>,
}

/// Site-specific parsing collaborator
pub trait Extractor: Send + Sync {
    fn extract(&self, page: &str, task: &FetchTask) -> Result<Extraction, ExtractError>;
}

struct Selectors {
    collection_item: Selector,
    collection_title: Selector,
    collection_count: Selector,
    collection_status: Selector,
    item_row: Selector,
    item_date: Selector,
    detail_body: Selector,
    link: Selector,
    paragraph: Selector,
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|_| ExtractError::Selector(selector.to_string()))
}

const DEFAULT_PAGE_SIZE: u32 = 100;

/// Extractor for the configured catalog layout
pub struct SiteExtractor {
    base: Url,
    templates: PageTemplates,
    selectors: Selectors,
    /// Items per item-list page; numbers untitled rows across pages
    page_size: u32,
}

impl SiteExtractor {
    pub fn new(site: &SiteConfig) -> Result<Self, ExtractError> {
        let s = &site.selectors;
        Ok(Self {
            base: Url::parse(&site.base_url)?,
            templates: PageTemplates::from_site(site),
            page_size: DEFAULT_PAGE_SIZE,
            selectors: Selectors {
                collection_item: parse_selector(&s.collection_item)?,
                collection_title: parse_selector(&s.collection_title)?,
                collection_count: parse_selector(&s.collection_count)?,
                collection_status: parse_selector(&s.collection_status)?,
                item_row: parse_selector(&s.item_row)?,
                item_date: parse_selector(&s.item_date)?,
                detail_body: parse_selector(&s.detail_body)?,
                link: parse_selector("a[href]")?,
                paragraph: parse_selector("p")?,
            },
        })
    }

    /// Sets the item-list page size used for position numbering
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn extract_collections(&self, page: &str) -> Result<Extraction, ExtractError> {
        let document = Html::parse_document(page);
        let sel = &self.selectors;
        let mut extraction = Extraction::default();

        for entry in document.select(&sel.collection_item) {
            let title_el = entry.select(&sel.collection_title).next();
            let title = title_el.map(text_of).unwrap_or_default();

            let href = title_el
                .and_then(|el| el.select(&sel.link).next())
                .or_else(|| entry.select(&sel.link).next())
                .and_then(|a| a.value().attr("href"));
            let Some(href) = href else {
                tracing::warn!("Collection entry '{}' has no link", title);
                continue;
            };

            let Some(key) = collection_key(href) else {
                tracing::warn!("Could not extract collection key from URL: {}", href);
                continue;
            };

            let count_text = entry
                .select(&sel.collection_count)
                .next()
                .map(text_of)
                .unwrap_or_default();
            let item_count_hint = parse_count_hint(&count_text);
            let status = entry
                .select(&sel.collection_status)
                .next()
                .map(text_of)
                .unwrap_or_default();

            tracing::debug!("Found collection: {} ({})", title, key);

            extraction.follow_ups.push(FollowUp {
                url: self.templates.detail_list_page(&key, 1)?,
                kind: TaskKind::DetailListPage,
                parent: TaskParent::Collection {
                    key: key.clone(),
                    item_count: item_count_hint,
                },
                page: 1,
            });
            extraction.records.push(Record::Collection(CollectionRecord {
                key,
                title,
                source_url: self.base.join(href)?.to_string(),
                item_count_hint,
                status,
            }));
        }

        Ok(extraction)
    }

    fn extract_item_list(&self, page: &str, task: &FetchTask) -> Result<Extraction, ExtractError> {
        let collection_key = match &task.parent {
            TaskParent::Collection { key, .. } => key.clone(),
            other => {
                return Err(ExtractError::Malformed(format!(
                    "item list without owning collection: {:?}",
                    other
                )))
            }
        };

        let (items, declared_total) = match serde_json::from_str::<Value>(page) {
            Ok(payload) if payload.is_object() => self.items_from_json(&payload, &collection_key)?,
            _ => {
                tracing::debug!("Item list at {} is not JSON, parsing HTML", task.url);
                (self.items_from_html(page, &collection_key, task.page)?, None)
            }
        };

        let mut extraction = Extraction {
            declared_total,
            ..Extraction::default()
        };
        for item in items {
            extraction.follow_ups.push(FollowUp {
                url: Url::parse(&item.source_url)?,
                kind: TaskKind::DetailContentPage,
                parent: TaskParent::Item {
                    collection_key: item.collection_key.clone(),
                    sequence: item.sequence,
                },
                page: 0,
            });
            extraction.records.push(Record::Item(item));
        }

        Ok(extraction)
    }

    fn items_from_json(
        &self,
        payload: &Value,
        collection_key: &str,
    ) -> Result<(Vec<ItemRecord>, Option<u32>), ExtractError> {
        let total = payload.get("total").and_then(as_u64).map(|t| t as u32);
        let entries: &[Value] = match payload.get("data") {
            Some(Value::Array(entries)) => entries.as_slice(),
            Some(Value::Null) | None => &[],
            Some(_) => {
                return Err(ExtractError::Malformed(
                    "item list 'data' is not an array".to_string(),
                ))
            }
        };

        let mut items = Vec::with_capacity(entries.len());
        let mut seen = HashSet::new();
        for entry in entries {
            let Some(sequence) = entry.get("id").and_then(as_u64) else {
                tracing::warn!("Item entry without a usable id in {}: {}", collection_key, entry);
                continue;
            };
            if !seen.insert(sequence) {
                tracing::warn!("Duplicate item {}#{} on one page, skipping", collection_key, sequence);
                continue;
            }
            let href = entry.get("url").and_then(Value::as_str).unwrap_or_default();
            if href.is_empty() {
                tracing::warn!("Item {}#{} has no URL", collection_key, sequence);
                continue;
            }
            items.push(ItemRecord {
                collection_key: collection_key.to_string(),
                sequence: sequence as i64,
                title: entry
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
                source_url: self.base.join(href)?.to_string(),
                published: entry
                    .get("date")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim()
                    .to_string(),
            });
        }

        Ok((items, total))
    }

    fn items_from_html(
        &self,
        page: &str,
        collection_key: &str,
        page_number: u32,
    ) -> Result<Vec<ItemRecord>, ExtractError> {
        let document = Html::parse_document(page);
        let sel = &self.selectors;
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        // Rows on page N continue after the (N - 1) full pages before it
        let offset = i64::from(page_number.max(1) - 1) * i64::from(self.page_size);

        for (idx, row) in document.select(&sel.item_row).enumerate() {
            let Some(link) = row.select(&sel.link).next() else {
                continue;
            };
            let href = link.value().attr("href").unwrap_or_default();
            let title = text_of(link);
            // Position is the fallback numbering
            let sequence = chapter_number(&title).unwrap_or(offset + idx as i64 + 1);
            if !seen.insert(sequence) {
                tracing::warn!(
                    "Duplicate item {}#{} on one page ('{}'), skipping",
                    collection_key,
                    sequence,
                    title
                );
                continue;
            }
            let published = row.select(&sel.item_date).next().map(text_of).unwrap_or_default();

            items.push(ItemRecord {
                collection_key: collection_key.to_string(),
                sequence,
                title,
                source_url: self.base.join(href)?.to_string(),
                published,
            });
        }

        Ok(items)
    }

    fn extract_content(&self, page: &str, task: &FetchTask) -> Result<Extraction, ExtractError> {
        let (collection_key, sequence) = match &task.parent {
            TaskParent::Item {
                collection_key,
                sequence,
            } => (collection_key.clone(), *sequence),
            other => {
                return Err(ExtractError::Malformed(format!(
                    "content page without owning item: {:?}",
                    other
                )))
            }
        };

        let document = Html::parse_document(page);
        let container = document
            .select(&self.selectors.detail_body)
            .next()
            .ok_or_else(|| ExtractError::Malformed("content container not found".to_string()))?;

        let paragraphs: Vec<String> = container
            .select(&self.selectors.paragraph)
            .map(text_of)
            .filter(|p| !p.is_empty())
            .collect();

        let body = if paragraphs.is_empty() {
            container
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            paragraphs.join("\n\n")
        };

        if body.is_empty() {
            return Err(ExtractError::Malformed("content container is empty".to_string()));
        }

        Ok(Extraction {
            records: vec![Record::ItemDetail(ItemDetailRecord {
                collection_key,
                sequence,
                body,
            })],
            ..Extraction::default()
        })
    }
}

impl Extractor for SiteExtractor {
    fn extract(&self, page: &str, task: &FetchTask) -> Result<Extraction, ExtractError> {
        match task.kind {
            TaskKind::CollectionPage => self.extract_collections(page),
            TaskKind::DetailListPage => self.extract_item_list(page, task),
            TaskKind::DetailContentPage => self.extract_content(page, task),
        }
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Numbers in the payload come either as JSON numbers or numeric strings
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Business key from a `/novel/<key>.html` link
fn collection_key(href: &str) -> Option<String> {
    let start = href.find("/novel/")? + "/novel/".len();
    let rest = &href[start..];
    let end = rest.find('.')?;
    let key = &rest[..end];
    if key.is_empty() || !rest[end..].starts_with(".html") {
        return None;
    }
    Some(key.to_string())
}

/// First integer in a count hint such as "1,234 Chapters"
fn parse_count_hint(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Number from a "Chapter N" title
fn chapter_number(title: &str) -> Option<i64> {
    let start = title.find("Chapter ")? + "Chapter ".len();
    let digits: String = title[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SelectorConfig;

    fn site() -> SiteConfig {
        SiteConfig {
            base_url: "https://www.example.com".to_string(),
            list_url: "https://www.example.com/list/all/all-onclick-{page}.html".to_string(),
            detail_list_url: "https://www.example.com/e/extend/fy.php?page={page}&wjm={key}"
                .to_string(),
            selectors: SelectorConfig::default(),
        }
    }

    fn task(kind: TaskKind, parent: TaskParent) -> FetchTask {
        FetchTask::new(
            1,
            Url::parse("https://www.example.com/any").unwrap(),
            kind,
            parent,
            1,
        )
    }

    const LIST_PAGE: &str = r#"
        <html><body><ul>
          <li class="novel-item">
            <a href="/novel/martial-god.html"><h4 class="novel-title text2row">Martial God</h4></a>
            <span class="chapter">1,234 Chapters</span>
            <span class="status">Ongoing</span>
          </li>
          <li class="novel-item">
            <h4 class="novel-title"><a href="/novel/quiet-sea.html">Quiet Sea</a></h4>
            <span class="chapter">12 Chapters</span>
            <span class="status">Completed</span>
          </li>
          <li class="novel-item">
            <h4 class="novel-title"><a href="/about.html">Not a novel</a></h4>
          </li>
        </ul></body></html>
    "#;

    #[test]
    fn test_extract_collection_page() {
        let extractor = SiteExtractor::new(&site()).unwrap();
        let extraction = extractor
            .extract(LIST_PAGE, &task(TaskKind::CollectionPage, TaskParent::None))
            .unwrap();

        assert_eq!(extraction.records.len(), 2);
        match &extraction.records[0] {
            Record::Collection(c) => {
                assert_eq!(c.key, "martial-god");
                assert_eq!(c.title, "Martial God");
                assert_eq!(c.source_url, "https://www.example.com/novel/martial-god.html");
                assert_eq!(c.item_count_hint, Some(1234));
                assert_eq!(c.status, "Ongoing");
            }
            other => panic!("unexpected record {:?}", other),
        }

        assert_eq!(extraction.follow_ups.len(), 2);
        assert_eq!(
            extraction.follow_ups[1].url.as_str(),
            "https://www.example.com/e/extend/fy.php?page=1&wjm=quiet-sea"
        );
        assert_eq!(
            extraction.follow_ups[1].parent,
            TaskParent::Collection {
                key: "quiet-sea".to_string(),
                item_count: Some(12)
            }
        );
    }

    #[test]
    fn test_empty_collection_page_yields_nothing() {
        let extractor = SiteExtractor::new(&site()).unwrap();
        let extraction = extractor
            .extract("<html><body></body></html>", &task(TaskKind::CollectionPage, TaskParent::None))
            .unwrap();
        assert!(extraction.records.is_empty());
        assert!(extraction.follow_ups.is_empty());
    }

    #[test]
    fn test_extract_item_list_json() {
        let extractor = SiteExtractor::new(&site()).unwrap();
        let payload = r#"{"total": "150", "data": [
            {"id": 1, "title": " Chapter 1 ", "url": "/novel/q_1.html", "date": "2024-01-02"},
            {"id": "2", "title": "Chapter 2", "url": "/novel/q_2.html", "date": ""},
            {"title": "no id", "url": "/novel/q_x.html"}
        ]}"#;
        let parent = TaskParent::Collection {
            key: "q".to_string(),
            item_count: None,
        };
        let extraction = extractor
            .extract(payload, &task(TaskKind::DetailListPage, parent))
            .unwrap();

        assert_eq!(extraction.declared_total, Some(150));
        assert_eq!(extraction.records.len(), 2);
        assert_eq!(
            extraction.records[0],
            Record::Item(ItemRecord {
                collection_key: "q".to_string(),
                sequence: 1,
                title: "Chapter 1".to_string(),
                source_url: "https://www.example.com/novel/q_1.html".to_string(),
                published: "2024-01-02".to_string(),
            })
        );
        assert_eq!(extraction.follow_ups[1].kind, TaskKind::DetailContentPage);
        assert_eq!(
            extraction.follow_ups[1].parent,
            TaskParent::Item {
                collection_key: "q".to_string(),
                sequence: 2
            }
        );
    }

    #[test]
    fn test_extract_item_list_html_fallback() {
        let extractor = SiteExtractor::new(&site()).unwrap();
        let page = r#"<ul class="chapter-list">
            <li><a href="/novel/q_7.html">Chapter 7 Arrival</a><span class="time">2 days ago</span></li>
            <li><a href="/novel/q_extra.html">Side story</a></li>
        </ul>"#;
        let parent = TaskParent::Collection {
            key: "q".to_string(),
            item_count: Some(2),
        };
        let extraction = extractor
            .extract(page, &task(TaskKind::DetailListPage, parent))
            .unwrap();

        let sequences: Vec<i64> = extraction
            .records
            .iter()
            .filter_map(|r| match r {
                Record::Item(i) => Some(i.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![7, 2]);
        assert_eq!(extraction.declared_total, None);
    }

    fn item_sequences(extraction: &Extraction) -> Vec<(i64, String)> {
        extraction
            .records
            .iter()
            .filter_map(|r| match r {
                Record::Item(i) => Some((i.sequence, i.source_url.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_untitled_rows_are_numbered_across_pages() {
        let extractor = SiteExtractor::new(&site()).unwrap().with_page_size(50);
        let parent = TaskParent::Collection {
            key: "q".to_string(),
            item_count: None,
        };
        let list_task = |page: u32| {
            FetchTask::new(
                page as u64,
                Url::parse(&format!("https://www.example.com/e/extend/fy.php?page={}&wjm=q", page)).unwrap(),
                TaskKind::DetailListPage,
                parent.clone(),
                page,
            )
        };

        let page1 = r#"<ul class="chapter-list"><li><a href="/novel/q_a.html">Prologue</a></li></ul>"#;
        let page2 = r#"<ul class="chapter-list"><li><a href="/novel/q_b.html">Interlude</a></li></ul>"#;
        let first = extractor.extract(page1, &list_task(1)).unwrap();
        let second = extractor.extract(page2, &list_task(2)).unwrap();

        assert_eq!(
            item_sequences(&first),
            vec![(1, "https://www.example.com/novel/q_a.html".to_string())]
        );
        assert_eq!(
            item_sequences(&second),
            vec![(51, "https://www.example.com/novel/q_b.html".to_string())]
        );
        assert_eq!(
            second.follow_ups[0].parent,
            TaskParent::Item {
                collection_key: "q".to_string(),
                sequence: 51
            }
        );
    }

    #[test]
    fn test_duplicate_sequence_on_one_page_is_skipped() {
        let extractor = SiteExtractor::new(&site()).unwrap();
        let page = r#"<ul class="chapter-list">
            <li><a href="/novel/q_2.html">Chapter 2 Start</a></li>
            <li><a href="/novel/q_note.html">Author note</a></li>
            <li><a href="/novel/q_3.html">Chapter 3</a></li>
        </ul>"#;
        let parent = TaskParent::Collection {
            key: "q".to_string(),
            item_count: None,
        };
        let extraction = extractor
            .extract(page, &task(TaskKind::DetailListPage, parent))
            .unwrap();

        assert_eq!(
            item_sequences(&extraction),
            vec![
                (2, "https://www.example.com/novel/q_2.html".to_string()),
                (3, "https://www.example.com/novel/q_3.html".to_string()),
            ]
        );
        assert_eq!(extraction.follow_ups.len(), 2);

        let payload = r#"{"data": [
            {"id": 4, "title": "Chapter 4", "url": "/novel/q_4.html"},
            {"id": "4", "title": "Chapter 4 (repost)", "url": "/novel/q_4b.html"}
        ]}"#;
        let parent = TaskParent::Collection {
            key: "q".to_string(),
            item_count: None,
        };
        let extraction = extractor
            .extract(payload, &task(TaskKind::DetailListPage, parent))
            .unwrap();
        assert_eq!(
            item_sequences(&extraction),
            vec![(4, "https://www.example.com/novel/q_4.html".to_string())]
        );
    }

    #[test]
    fn test_extract_content() {
        let extractor = SiteExtractor::new(&site()).unwrap();
        let parent = TaskParent::Item {
            collection_key: "q".to_string(),
            sequence: 3,
        };
        let page = r#"<div class="chapter-content"><p> First. </p><p></p><p>Second.</p></div>"#;
        let extraction = extractor
            .extract(page, &task(TaskKind::DetailContentPage, parent.clone()))
            .unwrap();
        assert_eq!(
            extraction.records,
            vec![Record::ItemDetail(ItemDetailRecord {
                collection_key: "q".to_string(),
                sequence: 3,
                body: "First.\n\nSecond.".to_string(),
            })]
        );

        let bare = r#"<div class="chapter-content">Line one<br>Line two</div>"#;
        let extraction = extractor
            .extract(bare, &task(TaskKind::DetailContentPage, parent.clone()))
            .unwrap();
        match &extraction.records[0] {
            Record::ItemDetail(d) => assert_eq!(d.body, "Line one\n\nLine two"),
            other => panic!("unexpected record {:?}", other),
        }

        let missing = extractor.extract("<html><body>nothing</body></html>", &task(TaskKind::DetailContentPage, parent));
        assert!(matches!(missing, Err(ExtractError::Malformed(_))));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(collection_key("/novel/abc-def.html"), Some("abc-def".to_string()));
        assert_eq!(collection_key("https://x.com/novel/abc.html?x=1"), Some("abc".to_string()));
        assert_eq!(collection_key("/novel/abc"), None);
        assert_eq!(collection_key("/about.html"), None);

        assert_eq!(parse_count_hint("1,234 Chapters"), Some(1234));
        assert_eq!(parse_count_hint("Chapters: 56"), Some(56));
        assert_eq!(parse_count_hint("unknown"), None);

        assert_eq!(chapter_number("Chapter 12: Dawn"), Some(12));
        assert_eq!(chapter_number("Prologue"), None);
    }
}
