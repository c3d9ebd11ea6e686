use rust_stemmers::{Algorithm, Stemmer};
use crate::analysis::filter::TokenFilter;
use crate::analysis::token::{Token, TokenType};

pub struct StemmerFilter {
    pub algorithm: Algorithm,
}

impl StemmerFilter {
    pub fn new(algorithm: Algorithm) -> Self {
        StemmerFilter { algorithm }
    }
}

impl TokenFilter for StemmerFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        let stemmer = Stemmer::create(self.algorithm);

        tokens.into_iter()
            .map(|mut token| {
                if token.token_type == TokenType::Word {
                    token.text = stemmer.stem(&token.text).into_owned();
                    token.length = token.text.len();
                }
                token
            })
            .collect()
    }

    fn name(&self) -> &str {
        "stemmer"
    }

    fn clone_box(&self) -> Box<dyn TokenFilter> {
        Box::new(StemmerFilter {
            algorithm: self.algorithm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_words_only() {
        let filter = StemmerFilter::new(Algorithm::English);
        let out = filter.filter(vec![
            Token::new("indexing".into(), 0, 0),
            Token::new("2024".into(), 1, 9),
        ]);
        assert_eq!(out[0].text, "index");
        assert_eq!(out[1].text, "2024");
    }
}
