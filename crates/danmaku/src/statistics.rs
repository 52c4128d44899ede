//! Comment pool statistics.
//!
//! Summarises a pool: per-style counts, the most active senders, word
//! frequency and how many comments fall into each media-time bucket.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::record::{CommentRecord, StyleClass};
use crate::store::DanmuStore;

/// Statistics for a comment pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStatistics {
    /// Total number of comments recorded
    pub total_count: u64,
    /// Comments flagged as blocked
    pub blocked_count: u64,
    /// Comments without a sender id
    pub guest_count: u64,
    pub style_counts: Vec<StyleCount>,
    pub top_senders: Vec<TopSender>,
    pub word_frequency: Vec<WordFrequency>,
    /// Comments per media-time bucket, non-empty buckets only
    pub density_timeseries: Vec<DensityPoint>,
    pub bucket_secs: f64,
    /// Earliest comment timestamp
    pub first_timestamp: Option<f64>,
    /// Latest comment timestamp
    pub last_timestamp: Option<f64>,
}

impl PoolStatistics {
    /// Count for one style class.
    pub fn style_count(&self, class: StyleClass) -> u64 {
        self.style_counts
            .iter()
            .find(|entry| entry.style == class)
            .map_or(0, |entry| entry.count)
    }

    /// The busiest bucket, if any.
    pub fn peak(&self) -> Option<&DensityPoint> {
        self.density_timeseries.iter().max_by_key(|point| point.count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleCount {
    pub style: StyleClass,
    pub count: u64,
}

/// A top sender entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopSender {
    pub sender: String,
    pub comment_count: u64,
}

/// A word frequency entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordFrequency {
    pub word: String,
    pub count: u64,
}

/// One bucket of the density time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityPoint {
    /// Bucket start, in media seconds
    pub start: f64,
    pub count: u64,
}

/// Aggregator for calculating pool statistics.
#[derive(Debug)]
pub struct StatisticsAggregator {
    total_count: u64,
    blocked_count: u64,
    guest_count: u64,
    style_counts: [u64; 5],
    /// sender -> comment count
    sender_counts: HashMap<String, u64>,
    word_counts: HashMap<String, u64>,
    /// bucket index -> comment count
    buckets: BTreeMap<i64, u64>,
    bucket_secs: f64,
    first_timestamp: Option<f64>,
    last_timestamp: Option<f64>,
    max_top_senders: usize,
    max_words: usize,
    stop_words: HashSet<String>,
}

impl StatisticsAggregator {
    /// Create a new aggregator with 10 top senders, 50 words and 10 second
    /// buckets.
    pub fn new() -> Self {
        Self::with_config(10, 50, 10.0)
    }

    /// Create a new aggregator with custom limits. Non-positive bucket
    /// lengths fall back to 10 seconds.
    pub fn with_config(max_top_senders: usize, max_words: usize, bucket_secs: f64) -> Self {
        let bucket_secs = if bucket_secs.is_finite() && bucket_secs > 0.0 {
            bucket_secs
        } else {
            10.0
        };
        Self {
            total_count: 0,
            blocked_count: 0,
            guest_count: 0,
            style_counts: [0; 5],
            sender_counts: HashMap::new(),
            word_counts: HashMap::new(),
            buckets: BTreeMap::new(),
            bucket_secs,
            first_timestamp: None,
            last_timestamp: None,
            max_top_senders,
            max_words,
            stop_words: default_stop_words(),
        }
    }

    /// Statistics over everything currently in `store`.
    pub fn collect(store: &DanmuStore) -> PoolStatistics {
        let mut agg = Self::new();
        for entry in store.all() {
            agg.record(&entry.record, entry.flags.blocked);
        }
        agg.finalize()
    }

    /// Record a comment.
    pub fn record(&mut self, record: &CommentRecord, blocked: bool) {
        let timestamp = record.timestamp();
        self.first_timestamp = Some(self.first_timestamp.map_or(timestamp, |t| t.min(timestamp)));
        self.last_timestamp = Some(self.last_timestamp.map_or(timestamp, |t| t.max(timestamp)));

        self.total_count += 1;
        self.style_counts[record.class().index()] += 1;
        if blocked {
            self.blocked_count += 1;
        }

        if record.is_guest() {
            self.guest_count += 1;
        } else {
            *self
                .sender_counts
                .entry(record.sender().to_string())
                .or_insert(0) += 1;
        }

        // Words of blocked comments are not what viewers see
        if !blocked && record.class() != StyleClass::Advanced {
            self.process_words(record.text());
        }

        let bucket = (timestamp / self.bucket_secs).floor() as i64;
        *self.buckets.entry(bucket).or_insert(0) += 1;
    }

    fn process_words(&mut self, content: &str) {
        for word in tokenize(content) {
            let word_lower = word.to_lowercase();

            // Skip stop words and single characters
            if word_lower.chars().count() < 2 || self.stop_words.contains(&word_lower) {
                continue;
            }

            *self.word_counts.entry(word_lower).or_insert(0) += 1;
        }

        if self.word_counts.len() > self.max_words * 2 {
            self.prune_word_counts();
        }
    }

    /// Keep only the top words.
    fn prune_word_counts(&mut self) {
        let mut counts: Vec<_> = self.word_counts.drain().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(self.max_words);
        self.word_counts = counts.into_iter().collect();
    }

    /// Finalize and return statistics.
    pub fn finalize(self) -> PoolStatistics {
        self.current_stats()
    }

    /// Get current statistics without consuming the aggregator.
    pub fn current_stats(&self) -> PoolStatistics {
        let style_counts = StyleClass::ALL
            .into_iter()
            .map(|style| StyleCount {
                style,
                count: self.style_counts[style.index()],
            })
            .collect();

        let mut senders: Vec<_> = self.sender_counts.iter().collect();
        senders.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let top_senders = senders
            .into_iter()
            .take(self.max_top_senders)
            .map(|(sender, count)| TopSender {
                sender: sender.clone(),
                comment_count: *count,
            })
            .collect();

        let mut words: Vec<_> = self.word_counts.iter().collect();
        words.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let word_frequency = words
            .into_iter()
            .take(self.max_words)
            .map(|(word, count)| WordFrequency {
                word: word.clone(),
                count: *count,
            })
            .collect();

        let density_timeseries = self
            .buckets
            .iter()
            .map(|(bucket, count)| DensityPoint {
                start: *bucket as f64 * self.bucket_secs,
                count: *count,
            })
            .collect();

        PoolStatistics {
            total_count: self.total_count,
            blocked_count: self.blocked_count,
            guest_count: self.guest_count,
            style_counts,
            top_senders,
            word_frequency,
            density_timeseries,
            bucket_secs: self.bucket_secs,
            first_timestamp: self.first_timestamp,
            last_timestamp: self.last_timestamp,
        }
    }
}

impl Default for StatisticsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tokenize a comment into words.
fn tokenize(content: &str) -> Vec<&str> {
    // Handles both CJK and Western text, CJK runs stay whole
    content
        .split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .collect()
}

fn default_stop_words() -> HashSet<String> {
    let words = [
        // English
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
        "can", "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "then",
        "here", "there", "when", "where", "why", "how", "all", "so", "than", "too", "very", "just",
        "and", "but", "if", "or", "this", "that", "these", "those", "it", "its", "he", "she",
        "they", "them", "what", "which", "who", // Chinese common words
        "的", "了", "是", "在", "我", "有", "和", "就", "不", "人", "都", "一个", "也", "很",
        "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "这", "那",
        // Common danmaku filler
        "lol", "haha", "xd", "666", "233", "2333", "哈哈", "哈哈哈", "草",
    ];

    words.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CommentDraft, CommentId, DanmuStyle};

    fn record(id: u64, t: f64, text: &str, sender: &str) -> CommentRecord {
        CommentRecord::from_draft(CommentId(id), CommentDraft::new(t, text).with_sender(sender))
    }

    #[test]
    fn test_record_counts() {
        let mut agg = StatisticsAggregator::new();
        agg.record(&record(0, 1.0, "Hello world!", "u1"), false);
        agg.record(&record(1, 2.0, "Hi there!", ""), false);
        agg.record(&record(2, 3.0, "Another comment", "u1"), true);

        let stats = agg.current_stats();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.blocked_count, 1);
        assert_eq!(stats.guest_count, 1);
        assert_eq!(stats.style_count(StyleClass::Slide), 3);
        assert_eq!(stats.first_timestamp, Some(1.0));
        assert_eq!(stats.last_timestamp, Some(3.0));
    }

    #[test]
    fn test_style_counts() {
        let mut agg = StatisticsAggregator::new();
        let top = CommentRecord::from_draft(
            CommentId(0),
            CommentDraft::new(0.0, "x").with_style(DanmuStyle::Top),
        );
        let reverse = CommentRecord::from_draft(
            CommentId(1),
            CommentDraft::new(0.0, "x").with_style(DanmuStyle::Reverse),
        );
        agg.record(&top, false);
        agg.record(&reverse, false);
        agg.record(&reverse, false);

        let stats = agg.finalize();
        assert_eq!(stats.style_counts.len(), 5);
        assert_eq!(stats.style_count(StyleClass::Top), 1);
        assert_eq!(stats.style_count(StyleClass::Reverse), 2);
        assert_eq!(stats.style_count(StyleClass::Bottom), 0);
    }

    #[test]
    fn test_top_senders() {
        let mut agg = StatisticsAggregator::with_config(2, 10, 10.0);
        for i in 0..5 {
            agg.record(&record(i, 0.0, "msg", "u1"), false);
        }
        for i in 5..8 {
            agg.record(&record(i, 0.0, "msg", "u2"), false);
        }
        agg.record(&record(8, 0.0, "msg", "u3"), false);

        let stats = agg.current_stats();
        assert_eq!(
            stats.top_senders,
            vec![
                TopSender {
                    sender: "u1".into(),
                    comment_count: 5
                },
                TopSender {
                    sender: "u2".into(),
                    comment_count: 3
                },
            ]
        );
    }

    #[test]
    fn test_word_frequency_skips_blocked() {
        let mut agg = StatisticsAggregator::with_config(10, 10, 10.0);
        agg.record(&record(0, 0.0, "hello world hello", "u1"), false);
        agg.record(&record(1, 0.0, "hello rust world", "u2"), false);
        agg.record(&record(2, 0.0, "hello hello", "u3"), true);

        let stats = agg.current_stats();
        assert_eq!(stats.word_frequency[0].word, "hello");
        assert_eq!(stats.word_frequency[0].count, 3);
        let world = stats.word_frequency.iter().find(|w| w.word == "world");
        assert_eq!(world.map(|w| w.count), Some(2));
    }

    #[test]
    fn test_density_timeseries() {
        let mut agg = StatisticsAggregator::with_config(10, 10, 10.0);
        // out of order, as a loader may deliver them
        agg.record(&record(0, 15.0, "c", "u"), false);
        agg.record(&record(1, 0.0, "a", "u"), false);
        agg.record(&record(2, 5.0, "b", "u"), false);
        agg.record(&record(3, 45.0, "d", "u"), false);

        let stats = agg.finalize();
        assert_eq!(
            stats.density_timeseries,
            vec![
                DensityPoint {
                    start: 0.0,
                    count: 2
                },
                DensityPoint {
                    start: 10.0,
                    count: 1
                },
                DensityPoint {
                    start: 40.0,
                    count: 1
                },
            ]
        );
        assert_eq!(stats.peak().map(|p| p.start), Some(0.0));
    }

    #[test]
    fn test_collect_from_store() {
        let store = DanmuStore::new();
        let id = store.insert(CommentDraft::new(1.0, "one")).unwrap();
        store.insert(CommentDraft::new(2.0, "two")).unwrap();
        store.mark_blocked(id, true).unwrap();

        let stats = StatisticsAggregator::collect(&store);
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.blocked_count, 1);
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("Hello, world! How are you?");
        assert_eq!(tokens, vec!["Hello", "world", "How", "are", "you"]);

        let cjk_tokens = tokenize("你好 世界");
        assert_eq!(cjk_tokens, vec!["你好", "世界"]);
    }
}
