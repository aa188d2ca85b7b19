use std::fmt;
use std::str::FromStr;

use super::BusError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Word {
    Literal(String),
    /// `*`: exactly one word.
    Star,
    /// `#`: zero or more trailing words.
    Hash,
}

/// A topic-exchange binding pattern such as `payment.*` or `order.#`.
///
/// `#` is only accepted as the last word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    words: Vec<Word>,
}

impl TopicPattern {
    pub fn parse(raw: &str) -> Result<Self, BusError> {
        let invalid = |reason: &str| BusError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let parts: Vec<&str> = raw.split('.').collect();
        let mut words = Vec::with_capacity(parts.len());
        for (idx, part) in parts.iter().enumerate() {
            let word = match *part {
                "" => return Err(invalid("empty word")),
                "*" => Word::Star,
                "#" if idx + 1 == parts.len() => Word::Hash,
                "#" => return Err(invalid("'#' is only supported as the last word")),
                literal if is_word(literal) => Word::Literal(literal.to_string()),
                _ => return Err(invalid("words may only contain [A-Za-z0-9_-]")),
            };
            words.push(word);
        }

        Ok(Self {
            raw: raw.to_string(),
            words,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        let key: Vec<&str> = routing_key.split('.').collect();
        let mut pos = 0;
        for word in &self.words {
            match word {
                Word::Hash => return true,
                Word::Star => {
                    if key.get(pos).map_or(true, |w| w.is_empty()) {
                        return false;
                    }
                }
                Word::Literal(lit) => {
                    if key.get(pos) != Some(&lit.as_str()) {
                        return false;
                    }
                }
            }
            pos += 1;
        }
        pos == key.len()
    }

    /// Anchored regex over the topic names an exchange publishes to
    /// (`<exchange>.<routing key>`), in the syntax librdkafka expects for
    /// pattern subscriptions.
    pub fn to_topic_regex(&self, exchange: &str) -> String {
        let mut regex = format!("^{exchange}");
        for word in &self.words {
            match word {
                Word::Literal(lit) => {
                    regex.push_str("\\.");
                    regex.push_str(lit);
                }
                Word::Star => regex.push_str("\\.[^.]+"),
                Word::Hash => regex.push_str("(\\.[^.]+)*"),
            }
        }
        regex.push('$');
        regex
    }
}

pub(crate) fn is_word(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for TopicPattern {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicPattern::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_exactly_one_word() {
        let pattern = TopicPattern::parse("payment.*").unwrap();
        assert!(pattern.matches("payment.completed"));
        assert!(pattern.matches("payment.failed"));
        assert!(!pattern.matches("order.created"));
        assert!(!pattern.matches("payment"));
        assert!(!pattern.matches("payment.a.b"));
    }

    #[test]
    fn literal_pattern_matches_only_itself() {
        let pattern = TopicPattern::parse("order.created").unwrap();
        assert!(pattern.matches("order.created"));
        assert!(!pattern.matches("order.created.v2"));
        assert!(!pattern.matches("order.cancelled"));
    }

    #[test]
    fn trailing_hash_matches_zero_or_more_words() {
        let pattern = TopicPattern::parse("order.#").unwrap();
        assert!(pattern.matches("order"));
        assert!(pattern.matches("order.created"));
        assert!(pattern.matches("order.created.v2"));
        assert!(!pattern.matches("payment.completed"));
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert!(TopicPattern::parse("").is_err());
        assert!(TopicPattern::parse("payment..failed").is_err());
        assert!(TopicPattern::parse("#.created").is_err());
        assert!(TopicPattern::parse("payment.fa iled").is_err());
    }

    #[test]
    fn builds_anchored_topic_regex() {
        let pattern = TopicPattern::parse("payment.*").unwrap();
        assert_eq!(pattern.to_topic_regex("minishop"), "^minishop\\.payment\\.[^.]+$");

        let pattern = TopicPattern::parse("order.#").unwrap();
        assert_eq!(pattern.to_topic_regex("minishop"), "^minishop\\.order(\\.[^.]+)*$");
    }
}
