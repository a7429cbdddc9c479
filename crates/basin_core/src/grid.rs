use nalgebra::DMatrix;

/// Destination for sweep results: a `width x height x depth` numeric grid.
///
/// Row `y = 0` and column `x = 0` of every layer are reserved for axis labels;
/// data lives at `1..width, 1..height`. Writes outside the grid are a caller bug.
pub trait GridSink {
    /// Reallocates and zero-fills. Previous contents are always discarded.
    fn resize(&mut self, width: usize, height: usize, depth: usize);
    fn set(&mut self, value: f64, x: usize, y: usize, layer: usize);
    fn get(&self, x: usize, y: usize, layer: usize) -> f64;
    /// Zero-fills without changing the dimensions.
    fn clear(&mut self);

    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn depth(&self) -> usize;
}

/// Layered grid, one `width x height` matrix per layer indexed as `(x, y)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataGrid {
    layers: Vec<DMatrix<f64>>,
    width: usize,
    height: usize,
}

impl DataGrid {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        let mut grid = Self::default();
        grid.resize(width, height, depth);
        grid
    }

    pub fn layer(&self, layer: usize) -> Option<&DMatrix<f64>> {
        self.layers.get(layer)
    }

    /// Interior cells of one layer in `(x, y)` order, labels excluded.
    pub fn data_cells(&self, layer: usize) -> Vec<((usize, usize), f64)> {
        let Some(matrix) = self.layers.get(layer) else {
            return Vec::new();
        };
        (1..self.width)
            .flat_map(|x| (1..self.height).map(move |y| ((x, y), matrix[(x, y)])))
            .collect()
    }

    pub fn count_nonzero(&self, layer: usize) -> usize {
        self.data_cells(layer).iter().filter(|(_, v)| *v != 0.0).count()
    }
}

impl GridSink for DataGrid {
    fn resize(&mut self, width: usize, height: usize, depth: usize) {
        self.width = width;
        self.height = height;
        self.layers = (0..depth).map(|_| DMatrix::zeros(width, height)).collect();
    }

    fn set(&mut self, value: f64, x: usize, y: usize, layer: usize) {
        debug_assert!(
            x < self.width && y < self.height && layer < self.layers.len(),
            "grid write ({x}, {y}, {layer}) outside {}x{}x{}",
            self.width,
            self.height,
            self.layers.len()
        );
        if let Some(matrix) = self.layers.get_mut(layer) {
            if x < self.width && y < self.height {
                matrix[(x, y)] = value;
            }
        }
    }

    fn get(&self, x: usize, y: usize, layer: usize) -> f64 {
        match self.layers.get(layer) {
            Some(matrix) if x < self.width && y < self.height => matrix[(x, y)],
            _ => 0.0,
        }
    }

    fn clear(&mut self) {
        for matrix in &mut self.layers {
            matrix.fill(0.0);
        }
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn depth(&self) -> usize {
        self.layers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_always_clears() {
        let mut grid = DataGrid::new(3, 3, 1);
        grid.set(7.0, 1, 1, 0);
        assert_eq!(grid.get(1, 1, 0), 7.0);

        for (w, h, d) in [(3, 3, 1), (5, 2, 3), (2, 2, 1)] {
            grid.set(7.0, 1, 1, 0);
            grid.resize(w, h, d);
            assert_eq!(grid.get(1, 1, 0), 0.0);
            assert_eq!((grid.width(), grid.height(), grid.depth()), (w, h, d));
        }
    }

    #[test]
    fn clear_keeps_dimensions() {
        let mut grid = DataGrid::new(4, 3, 2);
        grid.set(1.5, 3, 2, 1);
        grid.clear();
        assert_eq!(grid.get(3, 2, 1), 0.0);
        assert_eq!(grid.depth(), 2);
        assert_eq!(grid.width(), 4);
    }

    #[test]
    fn layers_are_independent() {
        let mut grid = DataGrid::new(3, 3, 2);
        grid.set(2.0, 2, 1, 0);
        grid.set(5.0, 2, 1, 1);
        assert_eq!(grid.get(2, 1, 0), 2.0);
        assert_eq!(grid.layer(1).unwrap()[(2, 1)], 5.0);
    }

    #[test]
    fn data_cells_skip_label_row_and_column() {
        let mut grid = DataGrid::new(3, 3, 1);
        grid.set(-1.0, 0, 1, 0);
        grid.set(-1.0, 1, 0, 0);
        grid.set(4.0, 2, 2, 0);
        let cells = grid.data_cells(0);
        assert_eq!(cells.len(), 4);
        assert_eq!(grid.count_nonzero(0), 1);
        assert!(cells.contains(&((2, 2), 4.0)));
    }

    #[test]
    fn reads_outside_the_grid_are_zero() {
        let grid = DataGrid::new(2, 2, 1);
        assert_eq!(grid.get(5, 0, 0), 0.0);
        assert_eq!(grid.get(0, 0, 3), 0.0);
    }
}
