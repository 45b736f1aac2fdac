//! Byte-wise glob matching with the server's pattern syntax
//!
//! Wildcards:
//! - `*` matches any run of bytes, including none
//! - `?` matches exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` match one byte from (or outside) a class
//! - `\x` matches `x` literally

/// Check if a channel matches a glob pattern
pub fn glob_matches(pattern: &[u8], channel: &[u8]) -> bool {
    let mut p = 0;
    let mut c = 0;
    // Pattern position after the last `*` and the channel position it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while c < channel.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    while p < pattern.len() && pattern[p] == b'*' {
                        p += 1;
                    }
                    if p == pattern.len() {
                        return true;
                    }
                    backtrack = Some((p, c));
                    continue;
                }
                b'?' => {
                    p += 1;
                    c += 1;
                    continue;
                }
                b'[' => {
                    let (matched, next) = match_class(pattern, p, channel[c]);
                    if matched {
                        p = next;
                        c += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == channel[c] {
                        p += 2;
                        c += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == channel[c] {
                        p += 1;
                        c += 1;
                        continue;
                    }
                }
            }
        }

        // Mismatch: let the last `*` swallow one more byte
        match backtrack {
            Some((star_p, star_c)) => {
                p = star_p;
                c = star_c + 1;
                backtrack = Some((star_p, star_c + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }

    p == pattern.len()
}

/// Matches `byte` against the class opening at `start`.
///
/// Returns whether it matched and the pattern index after the class.
fn match_class(pattern: &[u8], start: usize, byte: u8) -> (bool, usize) {
    let mut p = start + 1;
    let negate = pattern.get(p) == Some(&b'^');
    if negate {
        p += 1;
    }

    let mut matched = false;
    while p < pattern.len() && pattern[p] != b']' {
        if pattern[p] == b'\\' && p + 1 < pattern.len() {
            p += 1;
            matched |= pattern[p] == byte;
        } else if p + 2 < pattern.len() && pattern[p + 1] == b'-' && pattern[p + 2] != b']' {
            let (lo, hi) = if pattern[p] <= pattern[p + 2] {
                (pattern[p], pattern[p + 2])
            } else {
                (pattern[p + 2], pattern[p])
            };
            matched |= (lo..=hi).contains(&byte);
            p += 2;
        } else {
            matched |= pattern[p] == byte;
        }
        p += 1;
    }

    // An unterminated class runs to the end of the pattern
    let next = if p < pattern.len() { p + 1 } else { p };

    (matched != negate, next)
}
