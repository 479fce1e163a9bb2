/// Strips C0 control characters (except tab, newline, and carriage return) and caps the
/// result at `max_chars` characters. C1 controls are left alone. Applied to
/// conversational text before it reaches the extractor.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
	input
		.chars()
		.filter(|c| !matches!(c, '\u{0}'..='\u{1f}' | '\u{7f}') || matches!(c, '\t' | '\n' | '\r'))
		.take(max_chars)
		.collect()
}
