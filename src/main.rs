use nalgebra_sparse::{CooMatrix, CsrMatrix};
use tracing::info;
use warpfm::{Flt, RandomState, RatingStore, WarpConfig, WarpError, WarpModel};

fn synthetic_ratings(no_users: usize, no_items: usize, no_groups: usize) -> CsrMatrix<Flt> {
    let group_size = no_items / no_groups;
    let mut coo = CooMatrix::new(no_users, no_items);
    for user in 0..no_users {
        let group = user % no_groups;
        for offset in 0..group_size / 2 {
            let item = group * group_size + (user * 7 + offset * 2) % group_size;
            coo.push(user, item, if offset % 3 == 0 { 5.0 } else { 3.0 });
        }
    }
    CsrMatrix::from(&coo)
}

fn main() -> Result<(), WarpError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (no_users, no_items) = (200, 60);
    let ratings = synthetic_ratings(no_users, no_items, 4);
    let store = RatingStore::from_csr(&ratings);
    info!(users = store.num_users(), items = store.num_items(), nnz = store.nnz(), "built rating matrix");

    let config = WarpConfig::new_with_params(16, 3.0, 100, Some(1000), 0.05, 10.0)?;
    let mut model = WarpModel::new(config, RandomState::from_seed(2024), no_users, no_items);
    let stats = model.fit(&store, 20, true)?;
    info!(samples = stats.samples, mean_total_trials = stats.mean_total_trials, "training done");

    let items = (0..no_items).collect::<Vec<_>>();
    for user in 0..4 {
        let scores = model.predict(user, &items)?;
        let mut ranked = items.clone();
        ranked.sort_unstable_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        info!(user, top = ?&ranked[..5], "top items");
    }
    Ok(())
}
