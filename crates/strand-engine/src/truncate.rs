const DEFAULT_MAX_OUTPUT: usize = 256 * 1024; // 256KB
const BASH_MAX_OUTPUT: usize = 1024 * 1024; // 1MB

/// Returns the max output size for a given tool name.
pub fn max_output_for_tool(tool_name: &str) -> usize {
    match tool_name {
        "bash" => BASH_MAX_OUTPUT,
        _ => DEFAULT_MAX_OUTPUT,
    }
}

/// Truncate tool output if it exceeds `max_bytes`.
/// Truncates at a char boundary and appends a marker showing original vs
/// truncated size.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut boundary = max_bytes;
    while boundary > 0 && !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let truncated = &output[..boundary];
    format!(
        "{truncated}\n\n[truncated: {} bytes -> {} bytes]",
        output.len(),
        boundary
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        let input = "hello world";
        let result = truncate_output(input, 1024);
        assert_eq!(result, input);
    }

    #[test]
    fn truncates_at_limit() {
        let input = "a".repeat(1000);
        let result = truncate_output(&input, 100);
        assert!(result.len() < 200);
        assert!(result.contains("[truncated: 1000 bytes -> 100 bytes]"));
        assert!(result.starts_with("aaaa"));
    }

    #[test]
    fn truncates_at_char_boundary() {
        let input = "é".repeat(100); // 2 bytes each
        let result = truncate_output(&input, 11);
        assert!(result.contains("[truncated:"));
        assert!(result.is_char_boundary(0));
        // 11 is mid-char for 2-byte chars; boundary backs off to 10
        assert!(result.contains("-> 10 bytes]"));
    }

    #[test]
    fn bash_gets_larger_limit() {
        assert_eq!(max_output_for_tool("bash"), 1024 * 1024);
    }

    #[test]
    fn other_tools_get_default_limit() {
        assert_eq!(max_output_for_tool("read_file"), 256 * 1024);
    }

    #[test]
    fn exact_boundary_no_truncation() {
        let input = "a".repeat(100);
        assert_eq!(truncate_output(&input, 100), input);
    }

    #[test]
    fn one_over_truncates() {
        let input = "a".repeat(101);
        let result = truncate_output(&input, 100);
        assert!(result.contains("[truncated: 101 bytes -> 100 bytes]"));
    }

    #[test]
    fn empty_string() {
        assert_eq!(truncate_output("", 100), "");
    }
}
