//! Operational fault detection.
//!
//! An ATM that is out of service or out of cash reports zero withdrawals, and a
//! machine with a logged fault reports whatever its counters held. Neither figure is
//! demand, so both are hidden from feature derivation. The truth table keeps the
//! original values; only the working copy is touched here.

use crate::table::FeatureTable;

/// Clears usage on faulty records and on runs of at least `min_zero_run` consecutive
/// zero-usage days. Returns the number of records cleared.
pub fn detect_faults(table: &mut FeatureTable, min_zero_run: usize) -> usize {
    let mut cleared = 0usize;

    for row in 0..table.len() {
        if table.fault[row] && table.usage[row].is_some() {
            table.usage[row] = None;
            cleared += 1;
        }
    }

    if min_zero_run > 0 {
        for (_, range) in table.entity_ranges() {
            let mut run_start = range.start;
            for row in range.clone() {
                let is_zero = table.usage[row] == Some(0.0);
                let continues = row > run_start
                    && (table.trandate[row] - table.trandate[row - 1]).num_days() == 1;
                if !is_zero {
                    cleared += clear_run(table, run_start, row, min_zero_run);
                    run_start = row + 1;
                } else if row > run_start && !continues {
                    cleared += clear_run(table, run_start, row, min_zero_run);
                    run_start = row;
                }
            }
            cleared += clear_run(table, run_start, range.end, min_zero_run);
        }
    }

    if cleared > 0 {
        log::info!("Fault detection hid {cleared} usage values from feature derivation.");
    }
    cleared
}

fn clear_run(table: &mut FeatureTable, start: usize, end: usize, min_zero_run: usize) -> usize {
    if end <= start || end - start < min_zero_run {
        return 0;
    }
    for row in start..end {
        table.usage[row] = None;
    }
    end - start
}
