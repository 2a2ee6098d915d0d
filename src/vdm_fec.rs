//! Vandermonde/Cauchy MDS forward error correction.
//!
//! `k` source symbols in a FEC group are never re-encoded: they go out on
//! the wire untouched, tagged [`crate::wire::FecPktType::Source`]. Up to
//! `r` repair symbols are produced as linear combinations of the source
//! symbols over GF(256), using a systematic Cauchy matrix construction
//! (Blomer et al.) rather than a plain Vandermonde matrix: mixing an
//! identity block (the untouched source rows) with a plain Vandermonde
//! block does not guarantee every k-subset of rows is invertible, but
//! mixing identity with a Cauchy block does. That MDS property is what
//! gives the any-`k`-of-`n` recovery guarantee: the group decodes from
//! *any* k of the k+r symbols, not just a particular set.
//!
//! The GF(256) arithmetic itself is shared with [`crate::gf256`].

use std::collections::BTreeMap;

use crate::error::SliqError;
use crate::gf256;

/// Maximum source symbols in a single FEC group. Matches the group-index
/// byte in [`crate::wire::FecBlock`] while keeping `k + r <= 255` so that
/// Cauchy node ids never collide with source node ids.
pub const MAX_GROUP_SIZE: usize = 10;

fn cauchy_row(k: usize, repair_index: usize) -> Vec<u8> {
    let x_j = (k + repair_index) as u8;
    (0..k)
        .map(|c| {
            let y_c = c as u8;
            gf256::inv(gf256::add(x_j, y_c))
        })
        .collect()
}

fn row_for_index(k: usize, idx: usize) -> Vec<u8> {
    if idx < k {
        let mut row = vec![0u8; k];
        row[idx] = 1;
        row
    } else {
        cauchy_row(k, idx - k)
    }
}

/// Invert a square matrix over GF(256) via Gauss-Jordan elimination.
///
/// Returns `None` only if `matrix` is itself singular, which should never
/// happen for rows produced by [`row_for_index`] (the systematic
/// identity/Cauchy construction is MDS by design) — callers treat a `None`
/// here as an internal bug, not a recoverable decode failure.
fn invert(mut matrix: Vec<Vec<u8>>) -> Option<Vec<Vec<u8>>> {
    let n = matrix.len();
    let mut inv: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let mut row = vec![0u8; n];
            row[i] = 1;
            row
        })
        .collect();

    for col in 0..n {
        let pivot_row = (col..n).find(|&r| matrix[r][col] != 0)?;
        matrix.swap(col, pivot_row);
        inv.swap(col, pivot_row);

        let pivot = matrix[col][col];
        let pivot_inv = gf256::inv(pivot);
        for c in 0..n {
            matrix[col][c] = gf256::mul(matrix[col][c], pivot_inv);
            inv[col][c] = gf256::mul(inv[col][c], pivot_inv);
        }

        for r in 0..n {
            if r == col {
                continue;
            }
            let factor = matrix[r][col];
            if factor == 0 {
                continue;
            }
            for c in 0..n {
                matrix[r][c] = gf256::add(matrix[r][c], gf256::mul(factor, matrix[col][c]));
                inv[r][c] = gf256::add(inv[r][c], gf256::mul(factor, inv[col][c]));
            }
        }
    }

    Some(inv)
}

/// Produce `num_repair` repair symbols for a group of source symbols.
///
/// All source symbols must already be padded to a common length (callers
/// pad with zeros to the group's largest packet and track the true,
/// per-packet length separately via [`crate::wire::FecBlock::encoded_length`]).
pub fn generate_repair(sources: &[&[u8]], num_repair: usize) -> Result<Vec<Vec<u8>>, SliqError> {
    generate_repair_range(sources, 0, num_repair)
}

/// Produce `count` repair symbols starting at Cauchy index `start`, for a
/// group whose first `start` repair symbols were already generated (and
/// sent) in an earlier round. Continuing the sequence rather than
/// restarting at index 0 keeps every symbol ever emitted for the group
/// linearly independent from the others, so a receiver can still recover
/// the group from any `k` of the union across rounds.
pub fn generate_repair_range(
    sources: &[&[u8]],
    start: usize,
    count: usize,
) -> Result<Vec<Vec<u8>>, SliqError> {
    let k = sources.len();
    if k == 0 || k > MAX_GROUP_SIZE {
        return Err(SliqError::MalformedHeader("fec: invalid group size"));
    }
    let symbol_len = sources[0].len();
    if sources.iter().any(|s| s.len() != symbol_len) {
        return Err(SliqError::MalformedHeader(
            "fec: source symbols not uniformly padded",
        ));
    }

    let mut repairs = Vec::with_capacity(count);
    for j in start..start + count {
        let row = cauchy_row(k, j);
        let mut out = vec![0u8; symbol_len];
        for (c, coeff) in row.iter().enumerate() {
            if *coeff == 0 {
                continue;
            }
            for (pos, byte) in sources[c].iter().enumerate() {
                out[pos] = gf256::add(out[pos], gf256::mul(*coeff, *byte));
            }
        }
        repairs.push(out);
    }
    Ok(repairs)
}

/// Accumulates received source and repair symbols for one FEC group and
/// recovers the missing source symbols as soon as `k` of them have
/// arrived.
#[derive(Debug)]
pub struct FecGroupDecoder {
    k: usize,
    symbol_len: usize,
    received: BTreeMap<usize, Vec<u8>>,
}

impl FecGroupDecoder {
    pub fn new(k: usize, symbol_len: usize) -> Self {
        FecGroupDecoder {
            k,
            symbol_len,
            received: BTreeMap::new(),
        }
    }

    /// Record a symbol at group index `idx` (source indices are `0..k`,
    /// repair indices are `k..`).
    pub fn insert(&mut self, idx: usize, mut data: Vec<u8>) {
        data.resize(self.symbol_len, 0);
        self.received.insert(idx, data);
    }

    pub fn have(&self) -> usize {
        self.received.len()
    }

    pub fn is_complete(&self) -> bool {
        (0..self.k).all(|i| self.received.contains_key(&i))
    }

    /// Attempt to recover all `k` source symbols. Returns `Ok(None)` if not
    /// enough symbols have arrived yet.
    pub fn try_decode(&self) -> Result<Option<Vec<Vec<u8>>>, SliqError> {
        if self.is_complete() {
            return Ok(Some(
                (0..self.k).map(|i| self.received[&i].clone()).collect(),
            ));
        }
        if self.received.len() < self.k {
            return Ok(None);
        }

        let chosen: Vec<usize> = self.received.keys().take(self.k).copied().collect();
        let matrix: Vec<Vec<u8>> = chosen.iter().map(|&idx| row_for_index(self.k, idx)).collect();
        let inv = invert(matrix).ok_or_else(|| SliqError::Fatal(
            "fec: systematic matrix unexpectedly singular".into(),
        ))?;

        let mut recovered = vec![vec![0u8; self.symbol_len]; self.k];
        for (out_row, coeffs) in recovered.iter_mut().zip(inv.iter()) {
            for (coeff, &idx) in coeffs.iter().zip(chosen.iter()) {
                if *coeff == 0 {
                    continue;
                }
                let symbol = &self.received[&idx];
                for pos in 0..self.symbol_len {
                    out_row[pos] = gf256::add(out_row[pos], gf256::mul(*coeff, symbol[pos]));
                }
            }
        }
        Ok(Some(recovered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pad(bytes: &[u8], len: usize) -> Vec<u8> {
        let mut v = bytes.to_vec();
        v.resize(len, 0);
        v
    }

    #[test]
    fn recovers_from_all_source_packets() {
        let sources = vec![pad(b"alpha", 8), pad(b"bravo", 8), pad(b"charlie", 8)];
        let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        let repair = generate_repair(&refs, 2).unwrap();

        let mut dec = FecGroupDecoder::new(3, 8);
        for (i, s) in sources.iter().enumerate() {
            dec.insert(i, s.clone());
        }
        let _ = repair;
        let out = dec.try_decode().unwrap().unwrap();
        assert_eq!(out, sources);
    }

    #[test]
    fn recovers_any_k_of_n_combination() {
        let sources = vec![
            pad(b"one-two-three", 16),
            pad(b"four-five-six!", 16),
            pad(b"seven-eight-9", 16),
            pad(b"ten-eleven-tw", 16),
        ];
        let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        let repair = generate_repair(&refs, 3).unwrap();
        let k = sources.len();

        // Drop two source packets, keep two source + two repair.
        let mut dec = FecGroupDecoder::new(k, 16);
        dec.insert(1, sources[1].clone());
        dec.insert(3, sources[3].clone());
        dec.insert(k, repair[0].clone());
        dec.insert(k + 2, repair[2].clone());

        let out = dec.try_decode().unwrap().unwrap();
        assert_eq!(out, sources);
    }

    #[test]
    fn insufficient_symbols_returns_none() {
        let sources = vec![pad(b"x", 4), pad(b"y", 4), pad(b"z", 4)];
        let mut dec = FecGroupDecoder::new(3, 4);
        dec.insert(0, sources[0].clone());
        assert!(dec.try_decode().unwrap().is_none());
    }

    #[test]
    fn repair_with_all_repairs_plus_minimum_sources() {
        let sources = vec![pad(b"pkt-a", 6), pad(b"pkt-b", 6)];
        let refs: Vec<&[u8]> = sources.iter().map(|s| s.as_slice()).collect();
        let repair = generate_repair(&refs, 4).unwrap();

        let mut dec = FecGroupDecoder::new(2, 6);
        dec.insert(2, repair[0].clone());
        dec.insert(5, repair[3].clone());
        let out = dec.try_decode().unwrap().unwrap();
        assert_eq!(out, sources);
    }
}
