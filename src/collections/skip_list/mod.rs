pub mod arena;
pub mod skiplist;

use rand::Rng;

pub const MAX_HEIGHT: usize = 13;

/// Probability of growing a tower by one more level: 1/e.
const BRANCHING: f64 = 0.367_879_441_171_442_33;

fn rand_height() -> usize {
    let mut rng = rand::thread_rng();
    let mut height = 1;
    while height < MAX_HEIGHT && rng.gen_bool(BRANCHING) {
        height += 1;
    }
    height
}
