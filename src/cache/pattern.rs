//! Glob matching for cache key patterns.
//!
//! Supports `*` (any run of characters, including none) and `?` (exactly one
//! character); everything else matches literally. Redis also gives meaning
//! to `[`, `]` and `\`, so patterns sent to it go through [`to_redis_glob`]
//! and both cache tiers match the same keys.

/// Returns true if `key` matches `pattern`.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    // Position of the last `*` seen and the key index it was tried against.
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((sp, sk)) = star {
            pi = sp + 1;
            ki = sk + 1;
            star = Some((sp, sk + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// Rewrite `pattern` for Redis `SCAN MATCH`, escaping the characters Redis
/// treats as syntax but [`glob_match`] treats literally.
pub fn to_redis_glob(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
