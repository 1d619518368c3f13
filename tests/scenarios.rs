//! End-to-end scenarios over a real working directory.

use std::fs::OpenOptions;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use vecdb::{Db, Error, Metric};

fn index_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".index"))
        .collect();
    names.sort();
    names
}

fn random_rows(rng: &mut StdRng, n: usize, dim: usize) -> Vec<f32> {
    (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

#[test]
fn flat_l2_returns_exact_top1() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), 2, Metric::L2, "Flat", "")?;
    db.add_with_ids(&[10, 11, 12], &[0.0, 0.0, 3.0, 4.0, 1.0, 1.0])?;

    let (d, i) = db.search(1, &[0.0, 0.0])?;
    assert_eq!(i, vec![0]);
    assert_eq!(d, vec![0.0]);
    assert_eq!(db.uid_at(0), Some(10));

    let (d, i) = db.search(1, &[3.0, 4.0])?;
    assert_eq!(i, vec![1]);
    assert_eq!(d, vec![0.0]);
    Ok(())
}

#[test]
fn flat_inner_product_prefers_larger_scores() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), 2, Metric::InnerProduct, "Flat", "")?;
    db.add_with_ids(&[1, 2], &[1.0, 0.0, 0.0, 1.0])?;
    let (d, i) = db.search(1, &[2.0, 1.0])?;
    assert_eq!(i, vec![0]);
    assert_eq!(d, vec![2.0]);
    Ok(())
}

#[test]
fn truncated_base_file_fails_reopen() -> Result<()> {
    let dir = tempdir()?;
    {
        let db = Db::open(dir.path(), 2, Metric::L2, "Flat", "")?;
        db.add_with_ids(&[1], &[5.0, 6.0])?;
    }
    let path = dir.path().join("base.fvecs");
    let len = path.metadata()?.len();
    let file = OpenOptions::new().write(true).open(&path)?;
    file.set_len(len - 3)?;
    match Db::open(dir.path(), 2, Metric::L2, "Flat", "") {
        Err(Error::BaseLengthMismatch { .. }) => Ok(()),
        other => panic!("expected length mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn empty_database_returns_sentinel() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), 3, Metric::L2, "Flat", "")?;
    let (d, i) = db.search(2, &[0.0; 6])?;
    assert_eq!(i, vec![-1, -1]);
    assert_eq!(d, vec![0.0, 0.0]);
    Ok(())
}

#[test]
fn build_activate_persists_one_index_file() -> Result<()> {
    let dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(7);
    let db = Db::open(dir.path(), 4, Metric::L2, "IVF8,Flat", "nprobe=4")?;
    let n = 1000;
    let ids: Vec<i64> = (0..n as i64).collect();
    let rows = random_rows(&mut rng, n, 4);
    db.add_with_ids(&ids, &rows)?;

    let candidate = db.try_build_index(0)?;
    assert!(candidate.has_index());
    assert_eq!(candidate.ntrain(), 1000);
    db.activate_index(candidate)?;

    assert_eq!(index_files(dir.path()), vec!["IVF8,Flat.1000.index"]);
    assert_eq!(db.ntrain(), 1000);
    assert_eq!(db.flat_size(), 0);

    // A second cycle with nothing new is a no-op.
    let candidate = db.try_build_index(0)?;
    assert!(!candidate.has_index());
    Ok(())
}

#[test]
fn tail_rows_win_over_the_trained_index() -> Result<()> {
    let dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(11);
    let db = Db::open(dir.path(), 4, Metric::L2, "IVF8,Flat", "nprobe=2")?;
    let n = 1000;
    let ids: Vec<i64> = (0..n as i64).collect();
    db.add_with_ids(&ids, &random_rows(&mut rng, n, 4))?;
    db.activate_index(db.build_index()?)?;

    // New rows far from all prior data land in the flat tail.
    let far: Vec<f32> = (0..100)
        .flat_map(|i| [1.0e6, i as f32, 0.0, 0.0])
        .collect();
    let far_ids: Vec<i64> = (1000..1100).collect();
    db.add_with_ids(&far_ids, &far)?;
    assert_eq!(db.flat_size(), 100);

    for qi in 0..100 {
        let q = &far[qi * 4..(qi + 1) * 4];
        let (d, i) = db.search(1, q)?;
        assert_eq!(i[0], 1000 + qi as i64, "query {qi} must hit its own row");
        assert_eq!(d[0], 0.0);
    }
    Ok(())
}

#[test]
fn restart_restores_the_newest_persisted_index() -> Result<()> {
    let dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(13);
    let n = 500;
    let rows = random_rows(&mut rng, n, 4);
    let ids: Vec<i64> = (0..n as i64).collect();
    {
        let db = Db::open(dir.path(), 4, Metric::L2, "IVF4,Flat", "")?;
        db.add_with_ids(&ids, &rows)?;
        db.activate_index(db.build_index()?)?;
    }
    let db = Db::open(dir.path(), 4, Metric::L2, "IVF4,Flat", "")?;
    assert_eq!(db.total(), 500);
    assert_eq!(db.ntrain(), 500);
    assert_eq!(db.flat_size(), 0);

    // Refinement pins every answer to an exact distance.
    let q = &rows[17 * 4..18 * 4];
    let (d, i) = db.search(1, q)?;
    assert_eq!(i[0], 17);
    assert_eq!(d[0], 0.0);
    Ok(())
}

#[test]
fn flat_database_rebuilds_exact_index_on_build() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), 2, Metric::L2, "Flat", "")?;
    db.add_with_ids(&[1, 2, 3], &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0])?;
    assert_eq!(db.flat_size(), 3);

    let candidate = db.build_index()?;
    assert!(candidate.has_index());
    assert_eq!(candidate.ntrain(), 0);
    db.activate_index(candidate)?;

    // Exact index now covers everything; no index file is written for Flat.
    assert_eq!(db.flat_size(), 0);
    assert!(index_files(dir.path()).is_empty());
    let (d, i) = db.search(1, &[1.0, 0.1])?;
    assert_eq!(i, vec![1]);
    assert!((d[0] - 0.01).abs() < 1e-6);
    Ok(())
}

#[test]
fn try_build_respects_the_exhaust_threshold() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), 2, Metric::L2, "IVF4,Flat", "")?;
    db.add_with_ids(&[1, 2], &[0.0, 0.0, 1.0, 1.0])?;
    // Tail of 2 does not exceed a threshold of 2.
    let candidate = db.try_build_index(2)?;
    assert!(!candidate.has_index());
    assert_eq!(db.ntrain(), 0);
    Ok(())
}

#[test]
fn clear_work_dir_resets_everything() -> Result<()> {
    let dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(17);
    {
        let db = Db::open(dir.path(), 4, Metric::L2, "IVF4,Flat", "")?;
        let ids: Vec<i64> = (0..200).collect();
        db.add_with_ids(&ids, &random_rows(&mut rng, 200, 4))?;
        db.activate_index(db.build_index()?)?;
        assert_eq!(index_files(dir.path()).len(), 1);
    }
    Db::clear_work_dir(dir.path())?;
    let db = Db::open(dir.path(), 4, Metric::L2, "IVF4,Flat", "")?;
    assert_eq!(db.total(), 0);
    assert!(index_files(dir.path()).is_empty());
    Ok(())
}

#[test]
fn duplicate_ids_resolve_to_the_latest_row() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::open(dir.path(), 1, Metric::L2, "Flat", "")?;
    db.add_with_ids(&[5, 6], &[0.0, 1.0])?;
    db.add_with_ids(&[5], &[2.0])?;
    assert_eq!(db.row_of(5), Some(2));
    assert_eq!(db.uid_at(0), Some(5));
    assert_eq!(db.total(), 3);
    Ok(())
}

/// Past MAX_NTRAIN the training size freezes, so a follow-up build extends
/// the persisted index over the new tail instead of retraining.
#[test]
fn stable_training_size_extends_without_retraining() -> Result<()> {
    let dir = tempdir()?;
    let mut rng = StdRng::seed_from_u64(23);
    let db = Db::open(dir.path(), 2, Metric::L2, "IVF2,Flat", "nprobe=2")?;

    let first = 170_000usize;
    let ids: Vec<i64> = (0..first as i64).collect();
    db.add_with_ids(&ids, &random_rows(&mut rng, first, 2))?;
    let candidate = db.build_index()?;
    assert_eq!(candidate.ntrain(), 160_000);
    db.activate_index(candidate)?;
    assert_eq!(index_files(dir.path()), vec!["IVF2,Flat.160000.index"]);

    let more = 10_000usize;
    let more_ids: Vec<i64> = (first as i64..(first + more) as i64).collect();
    db.add_with_ids(&more_ids, &random_rows(&mut rng, more, 2))?;
    assert_eq!(db.flat_size(), more);

    let candidate = db.build_index()?;
    assert!(candidate.has_index());
    assert_eq!(candidate.ntrain(), 160_000);
    db.activate_index(candidate)?;

    assert_eq!(index_files(dir.path()), vec!["IVF2,Flat.160000.index"]);
    assert_eq!(db.flat_size(), 0);
    assert_eq!(db.total(), first + more);

    // A row appended after the first activation is now served by the index.
    let q = [1.0e3, -1.0e3];
    db.add_with_ids(&[999_999], &q)?;
    db.activate_index(db.build_index()?)?;
    let (d, i) = db.search(1, &q)?;
    assert_eq!(i[0] as usize, first + more);
    assert_eq!(d[0], 0.0);
    Ok(())
}
