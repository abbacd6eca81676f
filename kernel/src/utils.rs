//! Various utility functions/macros used throughout the kernel

use std::cmp::Ordering;

use itertools::{EitherOrBoth, Itertools};

/// convenient way to return an error if a condition isn't true
macro_rules! require {
    ( $cond:expr, $err:expr ) => {
        if !($cond) {
            return Err($err);
        }
    };
}

pub(crate) use require;

/// Replaces every `{i}` placeholder of a basename template with `index`.
pub(crate) fn render_basename(template: &str, index: usize) -> String {
    template.replace("{i}", &index.to_string())
}

// Maximal runs of digits and of non-digits
fn digit_runs(s: &str) -> impl Iterator<Item = &str> + '_ {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let end = rest
            .find(|c: char| c.is_ascii_digit() != first.is_ascii_digit())
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        rest = tail;
        Some(run)
    })
}

/// Orders strings so that runs of digits compare by numeric value, e.g. `part-2` before
/// `part-10`. Strings equal under that rule fall back to plain comparison.
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    digit_runs(a)
        .zip_longest(digit_runs(b))
        .map(|pair| match pair {
            EitherOrBoth::Both(a, b) => compare_runs(a, b),
            EitherOrBoth::Left(_) => Ordering::Greater,
            EitherOrBoth::Right(_) => Ordering::Less,
        })
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| a.cmp(b))
}

fn compare_runs(a: &str, b: &str) -> Ordering {
    let numeric = |run: &str| run.starts_with(|c: char| c.is_ascii_digit());
    if numeric(a) && numeric(b) {
        let (a, b) = (a.trim_start_matches('0'), b.trim_start_matches('0'));
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    } else {
        a.cmp(b)
    }
}
