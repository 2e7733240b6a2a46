mod tests_blocks;
mod tests_corruption;

use crate::cell::{Cell, CellKey, CellType, Tag};

/// A sorted run exercising shared prefixes, version chains, and type changes.
fn sample_cells(rows: usize, with_tags: bool) -> Vec<Cell> {
    let mut cells = Vec::new();
    for r in 0..rows {
        let row = format!("row-{r:04}");
        for q in ["a", "b"] {
            for ts in [300u64, 200, 100] {
                let ty = if ts == 200 { CellType::Delete } else { CellType::Put };
                let key = CellKey::new(row.clone(), "cf", q, ts, ty);
                let value = format!("v-{r}-{q}-{ts}");
                let tags = if with_tags && ts == 300 {
                    vec![Tag::new(1, format!("t{r}"))]
                } else {
                    Vec::new()
                };
                cells.push(Cell::new(key, value, tags));
            }
        }
    }
    cells
}
