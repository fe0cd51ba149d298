use std::{iter::Peekable, str::CharIndices};

use crate::{CompareOp, Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
	Ident(String),
	QuotedIdent(String),
	Text(String),
	Number(f64),
	/// Digit-led literal that is not a plain number, such as `2020-01-01T00:00:00Z`.
	Instant(String),
	Op(CompareOp),
	LParen,
	RParen,
	Comma,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
	pub(crate) kind: TokenKind,
	pub(crate) start: usize,
	pub(crate) end: usize,
}
impl Token {
	pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
		matches!(&self.kind, TokenKind::Ident(word) if word.eq_ignore_ascii_case(keyword))
	}
}

pub(crate) const KEYWORDS: &[&str] = &[
	"AND",
	"OR",
	"NOT",
	"LIKE",
	"ILIKE",
	"BETWEEN",
	"IS",
	"NULL",
	"BEFORE",
	"AFTER",
	"DURING",
	"INTERSECTS",
	"DWITHIN",
	"TRUE",
	"FALSE",
];

pub(crate) fn is_reserved(word: &str) -> bool {
	KEYWORDS.iter().any(|keyword| keyword.eq_ignore_ascii_case(word))
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>> {
	Lexer { input, chars: input.char_indices().peekable() }.run()
}

struct Lexer<'a> {
	input: &'a str,
	chars: Peekable<CharIndices<'a>>,
}
impl Lexer<'_> {
	fn run(mut self) -> Result<Vec<Token>> {
		let mut tokens = Vec::new();

		while let Some(&(start, ch)) = self.chars.peek() {
			if ch.is_whitespace() {
				self.chars.next();

				continue;
			}

			let kind = match ch {
				'(' => self.single(TokenKind::LParen),
				')' => self.single(TokenKind::RParen),
				',' => self.single(TokenKind::Comma),
				'=' => self.single(TokenKind::Op(CompareOp::Eq)),
				'<' | '>' | '!' => self.comparison(start)?,
				'\'' => TokenKind::Text(self.quoted(start, '\'')?),
				'"' => TokenKind::QuotedIdent(self.quoted(start, '"')?),
				c if c.is_ascii_digit() || self.signed_number_ahead(c) => self.literal(start),
				c if c.is_alphabetic() || c == '_' => self.ident(start),
				other => {
					return Err(Error::syntax(start, format!("unexpected character '{other}'.")));
				},
			};
			let end = self.chars.peek().map(|(idx, _)| *idx).unwrap_or(self.input.len());

			tokens.push(Token { kind, start, end });
		}

		Ok(tokens)
	}

	fn single(&mut self, kind: TokenKind) -> TokenKind {
		self.chars.next();

		kind
	}

	fn comparison(&mut self, start: usize) -> Result<TokenKind> {
		let Some((_, first)) = self.chars.next() else {
			return Err(Error::syntax(start, "unexpected end of input."));
		};
		let second = self.chars.next_if(|(_, c)| *c == '=' || (first == '<' && *c == '>'));
		let op = match (first, second.map(|(_, c)| c)) {
			('<', None) => CompareOp::Lt,
			('<', Some('=')) => CompareOp::Lte,
			('<', Some('>')) | ('!', Some('=')) => CompareOp::NotEq,
			('>', None) => CompareOp::Gt,
			('>', Some('=')) => CompareOp::Gte,
			_ => return Err(Error::syntax(start, format!("unexpected character '{first}'."))),
		};

		Ok(TokenKind::Op(op))
	}

	fn quoted(&mut self, start: usize, quote: char) -> Result<String> {
		let mut out = String::new();

		self.chars.next();

		loop {
			match self.chars.next() {
				Some((_, c)) if c == quote => {
					if self.chars.next_if(|(_, next)| *next == quote).is_some() {
						out.push(quote);
					} else {
						return Ok(out);
					}
				},
				Some((_, c)) => out.push(c),
				None => return Err(Error::syntax(start, "unterminated quoted literal.")),
			}
		}
	}

	fn signed_number_ahead(&self, c: char) -> bool {
		if !matches!(c, '-' | '+' | '.') {
			return false;
		}

		let mut ahead = self.chars.clone();

		ahead.next();

		ahead.peek().map(|(_, next)| next.is_ascii_digit()).unwrap_or(false)
	}

	fn literal(&mut self, start: usize) -> TokenKind {
		let mut end = start;

		while let Some((idx, c)) =
			self.chars.next_if(|(_, c)| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | ':' | '.' | '/'))
		{
			end = idx + c.len_utf8();
		}

		let raw = &self.input[start..end];

		match raw.parse::<f64>() {
			Ok(number) if number.is_finite() => TokenKind::Number(number),
			_ => TokenKind::Instant(raw.to_string()),
		}
	}

	fn ident(&mut self, start: usize) -> TokenKind {
		let mut end = start;

		while let Some((idx, c)) =
			self.chars.next_if(|(_, c)| c.is_alphanumeric() || matches!(c, '_' | '.' | ':'))
		{
			end = idx + c.len_utf8();
		}

		TokenKind::Ident(self.input[start..end].to_string())
	}
}
