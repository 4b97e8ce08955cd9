//! Natural, case-insensitive label ordering.
//!
//! Sibling nodes within a level are ordered by label: letters compare
//! case-insensitively, digit runs compare numerically ("2" before "10").
//! Ties fall back to a case-sensitive comparison so the order is total.

use std::cmp::Ordering;

use crate::nodes::ProcessedNode;

/// Compare two labels in natural, case-insensitive order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(lc), Some(rc)) => {
                if lc.is_ascii_digit() && rc.is_ascii_digit() {
                    let lnum = take_digits(&mut left);
                    let rnum = take_digits(&mut right);
                    match compare_digit_runs(&lnum, &rnum) {
                        Ordering::Equal => {}
                        unequal => return unequal,
                    }
                } else {
                    match lc.to_lowercase().cmp(rc.to_lowercase()) {
                        Ordering::Equal => {
                            left.next();
                            right.next();
                        }
                        unequal => return unequal,
                    }
                }
            }
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Compare digit runs numerically without parsing: strip leading zeros, then
/// a longer run is larger, equal lengths compare lexically.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Sort a buffered level by label. The sort is stable, so nodes with equal
/// labels keep their source order.
pub fn sort_level(level: &mut [ProcessedNode]) {
    level.sort_by(|a, b| natural_cmp(&a.label, &b.label));
}
