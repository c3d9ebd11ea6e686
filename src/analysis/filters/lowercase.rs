use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

pub struct LowercaseFilter;

impl TokenFilter for LowercaseFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens.into_iter()
            .map(|mut token| {
                if token.text.chars().any(char::is_uppercase) {
                    token.text = token.text.to_lowercase();
                    token.length = token.text.len();
                }
                token
            })
            .collect()
    }

    fn name(&self) -> &str {
        "lowercase"
    }

    fn clone_box(&self) -> Box<dyn TokenFilter> {
        Box::new(LowercaseFilter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_text() {
        let tokens = vec![Token::new("Rust".into(), 0, 0), Token::new("CHUNK".into(), 1, 5)];
        let out = LowercaseFilter.filter(tokens);
        assert_eq!(out[0].text, "rust");
        assert_eq!(out[1].text, "chunk");
        assert_eq!(out[1].position, 1);
    }
}
