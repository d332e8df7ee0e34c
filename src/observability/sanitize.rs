/// Makes a caller-supplied value safe to put in a log line: runs of control
/// whitespace collapse to one space and anything outside printable ASCII is
/// dropped.
pub fn sanitize_for_log(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_break = false;

    for ch in value.chars() {
        if matches!(ch, '\r' | '\n' | '\t') {
            if !in_break {
                out.push(' ');
                in_break = true;
            }
            continue;
        }
        in_break = false;

        if (' '..='~').contains(&ch) {
            out.push(ch);
        }
    }

    out
}
