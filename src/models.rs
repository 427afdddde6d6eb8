/// Column header of every per-source capture file.
pub const CAPTURE_HEADER: &str = "title\tlink\tdescription\tpub_date\tsave_date";

/// A configured feed endpoint from the source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub url: String,
    pub description: String,
    /// Per-source HTTP proxy URL; empty means direct.
    pub proxy: String,
}

impl Source {
    pub fn proxy(&self) -> Option<&str> {
        if self.proxy.is_empty() {
            None
        } else {
            Some(&self.proxy)
        }
    }
}

/// One parsed feed entry, normalized across RSS 2.0 and Atom.
///
/// `save_date` is the capture timestamp, not the feed's own publication
/// time. Within one capture file no two rows share a `link`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
    pub save_date: String,
}

impl FeedItem {
    /// Serialize to one tab-delimited capture row. Field-internal tabs and
    /// line breaks are flattened to spaces so every row stays one line.
    pub fn to_row(&self) -> String {
        [
            &self.title,
            &self.link,
            &self.description,
            &self.pub_date,
            &self.save_date,
        ]
        .iter()
        .map(|f| flatten_field(f))
        .collect::<Vec<_>>()
        .join("\t")
    }

    /// Parse a capture row written by [`FeedItem::to_row`]. Short rows get
    /// empty strings for the missing trailing fields; extra fields are
    /// dropped.
    pub fn from_row(line: &str) -> Self {
        let mut cols = line.split('\t');
        let mut next = || cols.next().unwrap_or("").to_string();
        Self {
            title: next(),
            link: next(),
            description: next(),
            pub_date: next(),
            save_date: next(),
        }
    }
}

fn flatten_field(field: &str) -> String {
    field.replace(['\t', '\n', '\r'], " ")
}

/// What happened to a single source during one fetch batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// New rows were appended to the capture file.
    Added(usize),
    /// The feed parsed but every item was already captured.
    NoNewItems,
    /// The feed yielded no items (empty, malformed past repair, or wrong
    /// format).
    NoItems,
    /// Transport failure; the body never reached the parser.
    Failed(String),
}

/// Per-source outcomes of one fetch batch, in source order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(String, SourceOutcome)>,
}

impl BatchReport {
    pub fn record(&mut self, url: &str, outcome: SourceOutcome) {
        self.outcomes.push((url.to_string(), outcome));
    }

    pub fn added(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                SourceOutcome::Added(n) => *n,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SourceOutcome::Failed(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> FeedItem {
        FeedItem {
            title: "Title".to_string(),
            link: "http://example.com/a".to_string(),
            description: "Desc".to_string(),
            pub_date: "Mon, 01 Jan 2024 00:00:00 GMT".to_string(),
            save_date: "2024-01-01 12:00:00".to_string(),
        }
    }

    #[test]
    fn test_row_round_trip() {
        let it = item();
        assert_eq!(FeedItem::from_row(&it.to_row()), it);
    }

    #[test]
    fn test_row_flattens_delimiters() {
        let mut it = item();
        it.title = "Multi\nline\ttitle".to_string();
        let row = it.to_row();
        assert!(!row.contains('\n'));
        assert_eq!(FeedItem::from_row(&row).title, "Multi line title");
    }

    #[test]
    fn test_from_row_short_line() {
        let it = FeedItem::from_row("only-title");
        assert_eq!(it.title, "only-title");
        assert_eq!(it.link, "");
        assert_eq!(it.save_date, "");
    }

    #[test]
    fn test_report_counts() {
        let mut report = BatchReport::default();
        report.record("a", SourceOutcome::Added(2));
        report.record("b", SourceOutcome::NoNewItems);
        report.record("c", SourceOutcome::Failed("timeout".to_string()));
        assert_eq!(report.added(), 2);
        assert_eq!(report.failures(), 1);
    }
}
