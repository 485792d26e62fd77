//! Glob-style matching for KEYS and the MATCH option of the SCAN family.
//!
//! Works on raw bytes since keys are binary-safe. Supports:
//! - `*` any sequence (including empty)
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]`, and negated `[^abc]` / `[!abc]` classes
//! - `\x` to match `x` literally
//!
//! Iterative two-pointer matcher with single-star backtracking, so the
//! worst case is O(n*m) instead of exponential.

/// A pattern compiled once and matched against many keys.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pat: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: &[u8]) -> Self {
        Self {
            pat: pattern.to_vec(),
        }
    }

    /// True if the pattern is a lone `*`, which matches everything.
    pub fn is_match_all(&self) -> bool {
        self.pat == b"*"
    }

    pub fn matches(&self, text: &[u8]) -> bool {
        glob_match(&self.pat, text)
    }
}

/// Tries to match one class starting at `pat[pi] == b'['` against `c`.
/// Returns the index just past `]` when the class matches, or `None`
/// when it doesn't (or the class is unterminated).
fn match_class(pat: &[u8], pi: usize, c: u8) -> Option<usize> {
    let mut j = pi + 1;
    let negated = j < pat.len() && (pat[j] == b'^' || pat[j] == b'!');
    if negated {
        j += 1;
    }

    let mut matched = false;
    while j < pat.len() && pat[j] != b']' {
        if pat[j] == b'\\' && j + 1 < pat.len() {
            j += 1;
            matched |= pat[j] == c;
            j += 1;
        } else if j + 2 < pat.len() && pat[j + 1] == b'-' && pat[j + 2] != b']' {
            let (lo, hi) = if pat[j] <= pat[j + 2] {
                (pat[j], pat[j + 2])
            } else {
                (pat[j + 2], pat[j])
            };
            matched |= (lo..=hi).contains(&c);
            j += 3;
        } else {
            matched |= pat[j] == c;
            j += 1;
        }
    }

    if j >= pat.len() {
        return None;
    }
    (matched != negated).then_some(j + 1)
}

fn glob_match(pat: &[u8], text: &[u8]) -> bool {
    let mut pi = 0;
    let mut ti = 0;

    // backtracking point for the most recent '*'
    let mut star_pi: Option<usize> = None;
    let mut star_ti = 0;

    while ti < text.len() {
        if pi < pat.len() {
            match pat[pi] {
                b'*' => {
                    star_pi = Some(pi);
                    star_ti = ti;
                    pi += 1;
                    continue;
                }
                b'?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                b'[' => {
                    if let Some(next) = match_class(pat, pi, text[ti]) {
                        pi = next;
                        ti += 1;
                        continue;
                    }
                }
                b'\\' if pi + 1 < pat.len() => {
                    if pat[pi + 1] == text[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c if c == text[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }

        // mismatch: let the last star swallow one more byte
        match star_pi {
            Some(sp) => {
                pi = sp + 1;
                star_ti += 1;
                ti = star_ti;
            }
            None => return false,
        }
    }

    while pi < pat.len() && pat[pi] == b'*' {
        pi += 1;
    }
    pi == pat.len()
}
