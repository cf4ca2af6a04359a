extern crate warpfm;

use ndarray::{Array2, Axis};
use warpfm::{apply_updates, try_warp_sample, Flt, RatingStore};
use rand::SeedableRng;

// Drives the sampling kernel from a hand-written training loop.
fn main() {
    let row_offsets = [0, 3, 5, 8, 9];
    let col_indices = [0, 2, 5, 1, 2, 3, 4, 5, 0];
    let values: [Flt; 9] = [5.0, 4.0, 1.0, 5.0, 2.0, 4.0, 5.0, 1.0, 5.0];
    let store = RatingStore::try_new(6, &row_offsets, &col_indices, &values).expect("valid ratings");

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut user_factors = Array2::<Flt>::from_elem((4, 3), 0.1);
    let mut item_factors = Array2::<Flt>::from_elem((6, 3), 0.1);
    let (gamma, max_norm) = (0.05, 1.0);

    let (mut samples, mut total) = (0, 0);
    for step in 0..500 {
        let sample = match try_warp_sample(user_factors.view(), item_factors.view(), &store, 4.0, 20, 200, &mut rng) {
            Ok(sample) => sample,
            Err(e) => {
                println!("step {}: {}", step, e);
                break;
            }
        };
        samples += 1;
        total += sample.total_trials;

        let user = user_factors.row(sample.user).to_owned();
        let user_delta = &item_factors.row(sample.positive_item) - &item_factors.row(sample.negative_item);
        let mut item_deltas = Array2::<Flt>::zeros((2, 3));
        item_deltas.row_mut(0).assign(&user);
        item_deltas.row_mut(1).assign(&(-&user));

        apply_updates(&mut user_factors, &[sample.user], user_delta.view().insert_axis(Axis(0)), gamma, max_norm)
            .expect("user update");
        apply_updates(
            &mut item_factors,
            &[sample.positive_item, sample.negative_item],
            item_deltas.view(),
            gamma,
            max_norm,
        )
        .expect("item update");

        if step % 100 == 0 {
            println!("step {}: {:?}", step, sample);
        }
    }
    println!("{} samples, mean trials per sample: {}", samples, total as f64 / samples.max(1) as f64);
    println!("user factors:\n{}", user_factors);
}
