use crate::{Filter, Literal, lexer};

/// Renders a filter tree as CQL. Empty groups render as the empty string.
pub fn to_cql(filter: &Filter) -> String {
	let mut out = String::new();

	write_filter(&mut out, filter);

	out
}

/// Quotes a property name unless it is a plain identifier.
pub fn quote_property(property: &str) -> String {
	let mut chars = property.chars();
	let plain = chars.next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false)
		&& chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
		&& !lexer::is_reserved(property);

	if plain { property.to_string() } else { format!("\"{}\"", property.replace('"', "\"\"")) }
}

fn write_filter(out: &mut String, filter: &Filter) {
	match filter {
		Filter::And(filters) => write_group(out, filters, " AND "),
		Filter::Or(filters) => write_group(out, filters, " OR "),
		Filter::Not(inner) =>
			if !inner.is_empty() {
				out.push_str("NOT (");
				write_filter(out, inner);
				out.push(')');
			},
		Filter::Compare { property, op, value } => {
			out.push_str(&format!("{} {} {value}", quote_property(property), op.as_str()));
		},
		Filter::Between { property, lower, upper } => {
			out.push_str(&format!("{} BETWEEN {lower} AND {upper}", quote_property(property)));
		},
		Filter::IsNull { property } => {
			out.push_str(&format!("{} IS NULL", quote_property(property)));
		},
		Filter::Before { property, instant } => {
			out.push_str(&format!("{} BEFORE {}", quote_property(property), write_instant(instant)));
		},
		Filter::After { property, instant } => {
			out.push_str(&format!("{} AFTER {}", quote_property(property), write_instant(instant)));
		},
		Filter::During { property, from, to } => {
			let period = write_instant(&format!("{from}/{to}"));

			out.push_str(&format!("{} DURING {period}", quote_property(property)));
		},
		Filter::Intersects { property, wkt } => {
			out.push_str(&format!("INTERSECTS({}, {wkt})", quote_property(property)));
		},
		Filter::DWithin { property, wkt, distance, units } => {
			out.push_str(&format!(
				"DWITHIN({}, {wkt}, {distance}, {units})",
				quote_property(property)
			));
		},
	}
}

fn write_group(out: &mut String, filters: &[Filter], separator: &str) {
	let operands: Vec<&Filter> = filters.iter().filter(|f| !f.is_empty()).collect();

	if let [single] = operands.as_slice() {
		write_filter(out, single);

		return;
	}

	for (idx, operand) in operands.iter().enumerate() {
		if idx > 0 {
			out.push_str(separator);
		}

		if needs_parens(operand) {
			out.push('(');
			write_filter(out, operand);
			out.push(')');
		} else {
			write_filter(out, operand);
		}
	}
}

/// A group needs parentheses when it still joins two or more operands after single-operand
/// wrappers are peeled off.
fn needs_parens(filter: &Filter) -> bool {
	match filter {
		Filter::And(filters) | Filter::Or(filters) => {
			let mut operands = filters.iter().filter(|f| !f.is_empty());

			match (operands.next(), operands.next()) {
				(Some(single), None) => needs_parens(single),
				(Some(_), Some(_)) => true,
				_ => false,
			}
		},
		_ => false,
	}
}

/// Writes a timestamp bare when it lexes as one literal, and quoted otherwise.
fn write_instant(instant: &str) -> String {
	let literal_char =
		|c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | ':' | '.' | '/');
	let bare =
		instant.starts_with(|c: char| c.is_ascii_digit()) && instant.chars().all(literal_char);

	if bare { instant.to_string() } else { Literal::text(instant).to_string() }
}
