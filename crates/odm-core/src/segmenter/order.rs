//! Fetch order for the sparse strategy.

use std::collections::VecDeque;

/// Order in which the sparse strategy visits segments: segment 0 first, then
/// the last segment, then the interior by repeated bisection (mid-first).
/// Probing both ends and the middle early surfaces truncation and range
/// pathologies before most of the transfer budget is spent.
pub fn sparse_order(segment_count: usize) -> Vec<usize> {
    match segment_count {
        0 => return Vec::new(),
        1 => return vec![0],
        2 => return vec![0, 1],
        _ => {}
    }
    let mut out = Vec::with_capacity(segment_count);
    out.push(0);
    out.push(segment_count - 1);

    // Bisect the interior [1, segment_count - 2], breadth-first.
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    queue.push_back((1, segment_count - 2));
    while let Some((lo, hi)) = queue.pop_front() {
        if lo > hi {
            continue;
        }
        let mid = lo + (hi - lo) / 2;
        out.push(mid);
        if mid > lo {
            queue.push_back((lo, mid - 1));
        }
        queue.push_back((mid + 1, hi));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_is_a_permutation() {
        for n in 0..50 {
            let mut order = sparse_order(n);
            order.sort_unstable();
            let expect: Vec<usize> = (0..n).collect();
            assert_eq!(order, expect, "n = {}", n);
        }
    }

    #[test]
    fn ends_come_first_then_middle() {
        let order = sparse_order(9);
        assert_eq!(order[0], 0);
        assert_eq!(order[1], 8);
        assert_eq!(order[2], 4, "interior midpoint third");
    }

    #[test]
    fn tiny_counts() {
        assert!(sparse_order(0).is_empty());
        assert_eq!(sparse_order(1), vec![0]);
        assert_eq!(sparse_order(2), vec![0, 1]);
    }
}
