use sprs::CsMat;

pub trait LinearSolver {
    fn solve(&self, a_mat: CsMat<f64>, b: &[f64]) -> Result<Vec<f64>, String>;
}
