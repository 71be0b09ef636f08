const MAX_PREVIEW_LENGTH: usize = 400;
const MAX_ERROR_LENGTH: usize = 500;

/// Largest char boundary at or below `max`.
fn floor_boundary(text: &str, max: usize) -> usize {
    let mut end = max.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Head and tail of tool output for log lines.
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_PREVIEW_LENGTH {
        return output.to_string();
    }
    let half = MAX_PREVIEW_LENGTH / 2;
    let head_end = floor_boundary(output, half);
    let mut tail_start = output.len() - half;
    while !output.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    format!(
        "{} ... [truncated {} bytes] ... {}",
        &output[..head_end],
        tail_start - head_end,
        &output[tail_start..]
    )
}

/// Error text short enough for a table cell, on one line.
pub fn truncate_error(error: &str) -> String {
    let single_line = error.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.len() <= MAX_ERROR_LENGTH {
        single_line
    } else {
        format!("{}...", &single_line[..floor_boundary(&single_line, MAX_ERROR_LENGTH)])
    }
}
