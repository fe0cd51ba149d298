use crate::{
	CompareOp, Error, Filter, Literal, Result,
	filter::MAX_TREE_DEPTH,
	lexer::{self, Token, TokenKind},
};

/// `NOT` is written as `NOT (...)`, so every tree level can cost two levels of nesting.
const MAX_NESTING: usize = MAX_TREE_DEPTH * 2;

/// Parses CQL text into a filter tree. Blank input yields an empty conjunction.
pub fn parse(input: &str) -> Result<Filter> {
	let tokens = lexer::tokenize(input)?;

	if tokens.is_empty() {
		return Ok(Filter::And(Vec::new()));
	}

	let mut parser = Parser { input, tokens, pos: 0, depth: 0 };
	let filter = parser.parse_or()?;

	if let Some(token) = parser.peek() {
		return Err(Error::syntax(token.start, "unexpected trailing input."));
	}

	Ok(filter)
}

struct Parser<'a> {
	input: &'a str,
	tokens: Vec<Token>,
	pos: usize,
	depth: usize,
}
impl Parser<'_> {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn advance(&mut self) -> Result<Token> {
		let token = self
			.tokens
			.get(self.pos)
			.cloned()
			.ok_or_else(|| Error::syntax(self.input.len(), "unexpected end of input."))?;

		self.pos += 1;

		Ok(token)
	}

	fn eat_keyword(&mut self, keyword: &str) -> bool {
		if self.peek().map(|token| token.is_keyword(keyword)).unwrap_or(false) {
			self.pos += 1;

			return true;
		}

		false
	}

	fn expect(&mut self, expected: &TokenKind, label: &str) -> Result<Token> {
		let token = self.advance()?;

		if &token.kind != expected {
			return Err(Error::syntax(token.start, format!("expected {label}.")));
		}

		Ok(token)
	}

	fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
		let token = self.advance()?;

		if !token.is_keyword(keyword) {
			return Err(Error::syntax(token.start, format!("expected {keyword}.")));
		}

		Ok(())
	}

	fn enter(&mut self, position: usize) -> Result<()> {
		self.depth += 1;

		if self.depth > MAX_NESTING {
			return Err(Error::syntax(position, format!("nesting exceeds {MAX_NESTING} levels.")));
		}

		Ok(())
	}

	fn parse_or(&mut self) -> Result<Filter> {
		let mut operands = vec![self.parse_and()?];

		while self.eat_keyword("OR") {
			operands.push(self.parse_and()?);
		}

		Ok(collapse(operands, Filter::Or))
	}

	fn parse_and(&mut self) -> Result<Filter> {
		let mut operands = vec![self.parse_unary()?];

		while self.eat_keyword("AND") {
			operands.push(self.parse_unary()?);
		}

		Ok(collapse(operands, Filter::And))
	}

	fn parse_unary(&mut self) -> Result<Filter> {
		let start = self.peek().map(|token| token.start).unwrap_or(self.input.len());

		if self.eat_keyword("NOT") {
			self.enter(start)?;

			let inner = self.parse_unary()?;

			self.depth -= 1;

			return Ok(Filter::Not(Box::new(inner)));
		}

		self.parse_primary()
	}

	fn parse_primary(&mut self) -> Result<Filter> {
		let Some(token) = self.peek() else {
			return Err(Error::syntax(self.input.len(), "expected a predicate."));
		};

		if token.kind == TokenKind::LParen {
			let start = token.start;

			self.pos += 1;
			self.enter(start)?;

			let inner = self.parse_or()?;

			self.expect(&TokenKind::RParen, "')'")?;

			self.depth -= 1;

			return Ok(inner);
		}
		if self.eat_keyword("INTERSECTS") {
			self.expect(&TokenKind::LParen, "'('")?;

			let property = self.property()?;

			self.expect(&TokenKind::Comma, "','")?;

			let wkt = self.geometry()?;

			self.expect(&TokenKind::RParen, "')'")?;

			return Ok(Filter::Intersects { property, wkt });
		}
		if self.eat_keyword("DWITHIN") {
			self.expect(&TokenKind::LParen, "'('")?;

			let property = self.property()?;

			self.expect(&TokenKind::Comma, "','")?;

			let wkt = self.geometry()?;

			self.expect(&TokenKind::Comma, "','")?;

			let distance = match self.advance()? {
				Token { kind: TokenKind::Number(value), .. } => value,
				other => return Err(Error::syntax(other.start, "expected a distance.")),
			};

			self.expect(&TokenKind::Comma, "','")?;

			let units = match self.advance()? {
				Token { kind: TokenKind::Ident(units), .. } => units,
				other => return Err(Error::syntax(other.start, "expected distance units.")),
			};

			self.expect(&TokenKind::RParen, "')'")?;

			return Ok(Filter::DWithin { property, wkt, distance, units });
		}

		let property = self.property()?;

		self.predicate(property)
	}

	fn predicate(&mut self, property: String) -> Result<Filter> {
		let token = self.advance()?;

		if let TokenKind::Op(op) = token.kind {
			let value = self.literal()?;

			return Ok(Filter::Compare { property, op, value });
		}
		if token.is_keyword("NOT") {
			let next = self.advance()?;
			let op = like_op(&next)
				.ok_or_else(|| Error::syntax(next.start, "expected LIKE or ILIKE after NOT."))?;

			return Ok(Filter::Not(Box::new(Filter::Compare {
				property,
				op,
				value: self.pattern()?,
			})));
		}
		if let Some(op) = like_op(&token) {
			return Ok(Filter::Compare { property, op, value: self.pattern()? });
		}
		if token.is_keyword("BETWEEN") {
			let lower = self.literal()?;

			self.expect_keyword("AND")?;

			let upper = self.literal()?;

			return Ok(Filter::Between { property, lower, upper });
		}
		if token.is_keyword("IS") {
			let negated = self.eat_keyword("NOT");

			self.expect_keyword("NULL")?;

			let filter = Filter::IsNull { property };

			return Ok(if negated { Filter::Not(Box::new(filter)) } else { filter });
		}
		if token.is_keyword("BEFORE") {
			return Ok(Filter::Before { property, instant: self.instant()? });
		}
		if token.is_keyword("AFTER") {
			return Ok(Filter::After { property, instant: self.instant()? });
		}
		if token.is_keyword("DURING") {
			let start = self.peek().map(|token| token.start).unwrap_or(self.input.len());
			let period = self.instant()?;
			let (from, to) = period
				.split_once('/')
				.ok_or_else(|| Error::syntax(start, "DURING expects '<start>/<end>'."))?;

			return Ok(Filter::During { property, from: from.to_string(), to: to.to_string() });
		}

		Err(Error::syntax(token.start, "expected a comparison operator."))
	}

	fn property(&mut self) -> Result<String> {
		let token = self.advance()?;

		match token.kind {
			TokenKind::QuotedIdent(name) => Ok(name),
			TokenKind::Ident(name) if !lexer::is_reserved(&name) => Ok(name),
			_ => Err(Error::syntax(token.start, "expected a property name.")),
		}
	}

	fn literal(&mut self) -> Result<Literal> {
		let token = self.advance()?;

		match token.kind {
			TokenKind::Text(value) => Ok(Literal::Text(value)),
			TokenKind::Number(value) => Ok(Literal::Number(value)),
			TokenKind::Ident(word) if word.eq_ignore_ascii_case("TRUE") => Ok(Literal::Bool(true)),
			TokenKind::Ident(word) if word.eq_ignore_ascii_case("FALSE") => Ok(Literal::Bool(false)),
			_ => Err(Error::syntax(token.start, "expected a literal value.")),
		}
	}

	fn pattern(&mut self) -> Result<Literal> {
		let token = self.advance()?;

		match token.kind {
			TokenKind::Text(value) => Ok(Literal::Text(value)),
			_ => Err(Error::syntax(token.start, "expected a quoted pattern.")),
		}
	}

	fn instant(&mut self) -> Result<String> {
		let token = self.advance()?;

		match token.kind {
			TokenKind::Instant(value) | TokenKind::Text(value) => Ok(value),
			TokenKind::Number(_) => Ok(self.input[token.start..token.end].trim().to_string()),
			_ => Err(Error::syntax(token.start, "expected a timestamp.")),
		}
	}

	/// Captures a WKT geometry verbatim, from its type keyword to the closing parenthesis.
	fn geometry(&mut self) -> Result<String> {
		let head = self.advance()?;

		if !matches!(head.kind, TokenKind::Ident(_)) {
			return Err(Error::syntax(head.start, "expected a WKT geometry."));
		}

		self.expect(&TokenKind::LParen, "'('")?;

		let mut depth = 1_usize;
		let mut end = head.end;

		while depth > 0 {
			let token = self.advance()?;

			match token.kind {
				TokenKind::LParen => depth += 1,
				TokenKind::RParen => depth -= 1,
				_ => {},
			}

			end = token.end;
		}

		Ok(self.input[head.start..end].to_string())
	}
}

fn like_op(token: &Token) -> Option<CompareOp> {
	if token.is_keyword("LIKE") {
		Some(CompareOp::Like)
	} else if token.is_keyword("ILIKE") {
		Some(CompareOp::ILike)
	} else {
		None
	}
}

fn collapse(mut operands: Vec<Filter>, group: fn(Vec<Filter>) -> Filter) -> Filter {
	if operands.len() == 1 { operands.remove(0) } else { group(operands) }
}
