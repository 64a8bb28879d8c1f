/// Make one line of subprocess output safe to echo: drop ANSI/OSC escape
/// sequences and control characters other than tab. Everything else passes
/// through untouched, however long the line.
/// Compiler diagnostics from kernel builds are colourised by default.
pub fn sanitize_log_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.next() {
                // CSI: parameters until a final byte in '@'..='~'.
                Some('[') => {
                    for n in chars.by_ref() {
                        if ('@'..='~').contains(&n) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ST (ESC \).
                Some(']') => {
                    while let Some(n) = chars.next() {
                        if n == '\x07' {
                            break;
                        }
                        if n == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        match c {
            '\t' => out.push('\t'),
            c if c.is_control() => continue,
            c => out.push(c),
        }
    }

    out
}
