/// One token out of an analyzer: raw term bytes plus where it sat in the
/// source text. The engine never interprets the bytes beyond comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub bytes: Vec<u8>,
    /// Token ordinal within the field value; phrase matching aligns these.
    pub position: u32,
    pub start: u32,
    pub end: u32,
    pub boost: f32,
}

/// Contract for external text analysis. Stateless per call; the same text
/// must yield the same tokens.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, field: &str, text: &str) -> Vec<Token>;
}

/// Lowercased alphanumeric runs; the built-in default and the analyzer the
/// test corpora use. Real pipelines live outside the engine.
#[derive(Debug, Default, Clone)]
pub struct SimpleAnalyzer;

impl Analyzer for SimpleAnalyzer {
    fn analyze(&self, _field: &str, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut word_start = 0u32;
        let mut position = 0u32;
        for (offset, ch) in text.char_indices() {
            if ch.is_alphanumeric() {
                if word.is_empty() {
                    word_start = offset as u32;
                }
                word.extend(ch.to_lowercase());
            } else if !word.is_empty() {
                tokens.push(Token {
                    bytes: word.as_bytes().to_vec(),
                    position,
                    start: word_start,
                    end: offset as u32,
                    boost: 1.0,
                });
                position += 1;
                word.clear();
            }
        }
        if !word.is_empty() {
            tokens.push(Token {
                bytes: word.as_bytes().to_vec(),
                position,
                start: word_start,
                end: text.len() as u32,
                boost: 1.0,
            });
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_lowercases() {
        let tokens = SimpleAnalyzer.analyze("body", "The quick-brown FOX!");
        let words: Vec<&str> = tokens
            .iter()
            .map(|t| std::str::from_utf8(&t.bytes).unwrap())
            .collect();
        assert_eq!(words, vec!["the", "quick", "brown", "fox"]);
        let positions: Vec<u32> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        // offsets point back into the original text:
        assert_eq!(&"The quick-brown FOX!"[4..9], "quick");
        assert_eq!(tokens[1].start, 4);
        assert_eq!(tokens[1].end, 9);
    }

    #[test]
    fn empty_and_symbol_only_text() {
        assert!(SimpleAnalyzer.analyze("body", "").is_empty());
        assert!(SimpleAnalyzer.analyze("body", "--- !!! ---").is_empty());
    }
}
