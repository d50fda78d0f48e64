//! CART regression tree.
//!
//! Each split minimizes the summed squared error of its two children. Splits are
//! only considered between distinct values, every leaf keeps at least `min_leaf`
//! rows (default 5) and the depth is capped at `max_depth` (default 5).

use super::{LearnerError, LearnerOptions, Learner, Regressor, check_option_names, check_shape, count_option};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

const METHOD: &str = "tree";

#[derive(Debug, Clone, Copy)]
pub struct TreeLearner;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn evaluate(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Node::Leaf(value) => *value,
            Node::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.evaluate(row)
                } else {
                    right.evaluate(row)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct TreeModel {
    root: Node,
}

impl Regressor for TreeModel {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0)).map(|row| self.root.evaluate(row)).collect()
    }
}

impl Learner for TreeLearner {
    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        options: &LearnerOptions,
    ) -> Result<Box<dyn Regressor>, LearnerError> {
        check_option_names(METHOD, options, &["max_depth", "min_leaf"])?;
        let max_depth = count_option(METHOD, options, "max_depth", 5, 0)?;
        let min_leaf = count_option(METHOD, options, "min_leaf", 5, 1)?;
        check_shape(METHOD, x, y, 1)?;

        let rows: Vec<usize> = (0..x.nrows()).collect();
        let grower = Grower { x, y, max_depth, min_leaf };
        Ok(Box::new(TreeModel {
            root: grower.grow(&rows, 0),
        }))
    }
}

struct Grower<'x, 'y> {
    x: ArrayView2<'x, f64>,
    y: ArrayView1<'y, f64>,
    max_depth: usize,
    min_leaf: usize,
}

struct Candidate {
    feature: usize,
    threshold: f64,
    error: f64,
}

impl Grower<'_, '_> {
    fn grow(&self, rows: &[usize], depth: usize) -> Node {
        let mean = rows.iter().map(|&i| self.y[i]).sum::<f64>() / rows.len() as f64;
        if depth >= self.max_depth || rows.len() < 2 * self.min_leaf {
            return Node::Leaf(mean);
        }
        let parent_error: f64 = rows.iter().map(|&i| (self.y[i] - mean).powi(2)).sum();

        let best = (0..self.x.ncols())
            .filter_map(|feature| self.best_split(rows, feature))
            .fold(None::<Candidate>, |best, candidate| match best {
                Some(b) if b.error <= candidate.error => Some(b),
                _ => Some(candidate),
            });

        match best {
            Some(split) if split.error < parent_error - 1e-12 => {
                let (left, right): (Vec<usize>, Vec<usize>) = rows
                    .iter()
                    .partition(|&&i| self.x[[i, split.feature]] <= split.threshold);
                Node::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left: Box::new(self.grow(&left, depth + 1)),
                    right: Box::new(self.grow(&right, depth + 1)),
                }
            }
            _ => Node::Leaf(mean),
        }
    }

    /// Best threshold on one feature, scanning sorted values with running sums.
    fn best_split(&self, rows: &[usize], feature: usize) -> Option<Candidate> {
        let mut order: Vec<(f64, f64)> = rows
            .iter()
            .map(|&i| (self.x[[i, feature]], self.y[i]))
            .collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        let n = order.len();
        let total: f64 = order.iter().map(|p| p.1).sum();
        let total_sq: f64 = order.iter().map(|p| p.1 * p.1).sum();
        let (mut left_sum, mut left_sq) = (0.0, 0.0);
        let mut best: Option<Candidate> = None;

        for split in 1..n {
            let (value, target) = order[split - 1];
            left_sum += target;
            left_sq += target * target;
            if split < self.min_leaf || n - split < self.min_leaf || value == order[split].0 {
                continue;
            }
            let (nl, nr) = (split as f64, (n - split) as f64);
            let right_sum = total - left_sum;
            let error = (left_sq - left_sum * left_sum / nl)
                + (total_sq - left_sq - right_sum * right_sum / nr);
            if best.as_ref().is_none_or(|b| error < b.error) {
                best = Some(Candidate {
                    feature,
                    threshold: (value + order[split].0) / 2.0,
                    error,
                });
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn options(max_depth: f64, min_leaf: f64) -> LearnerOptions {
        let mut options = LearnerOptions::new();
        options.insert("max_depth".to_string(), max_depth);
        options.insert("min_leaf".to_string(), min_leaf);
        options
    }

    #[test]
    fn splits_on_the_informative_feature() {
        let x = array![[0.0, 5.0], [1.0, 3.0], [2.0, 5.0], [3.0, 3.0]];
        let y = array![1.0, 1.0, 9.0, 9.0];
        let model = TreeLearner.fit(x.view(), y.view(), &options(3.0, 1.0)).unwrap();
        assert_eq!(
            model.predict(array![[0.5, 3.0], [2.5, 5.0]].view()),
            array![1.0, 9.0]
        );
    }

    #[test]
    fn depth_zero_is_the_mean() {
        let x = array![[0.0], [1.0]];
        let y = array![2.0, 6.0];
        let model = TreeLearner.fit(x.view(), y.view(), &options(0.0, 1.0)).unwrap();
        assert_eq!(model.predict(array![[0.0]].view()), array![4.0]);
    }

    #[test]
    fn min_leaf_limits_splitting() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![0.0, 0.0, 30.0];
        let model = TreeLearner.fit(x.view(), y.view(), &options(4.0, 2.0)).unwrap();
        assert_eq!(model.predict(array![[2.0]].view()), array![10.0]);
    }

    #[test]
    fn fits_views_of_separately_owned_data() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let model = {
            let y = vec![4.0, 4.0, 8.0, 8.0];
            let y = ArrayView1::from(y.as_slice());
            TreeLearner.fit(x.view(), y, &options(2.0, 1.0)).unwrap()
        };
        assert_eq!(model.predict(array![[0.5], [2.5]].view()), array![4.0, 8.0]);
    }
}
