use chrono::Utc;
use crowdcast_core::algo::smoothing::DampedHolt;
use crowdcast_core::config::Coefficients;
use crowdcast_core::file_sink::MODELS_FILE;
use crowdcast_core::{FileSink, ModelKind, PersistenceSink, Prediction, Zone};
use std::path::PathBuf;

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("crowdcast-test-{}", uuid::Uuid::new_v4()))
}

#[tokio::test]
async fn model_states_survive_reopen() {
    let dir = scratch_dir();
    let model = DampedHolt::fit(&[10.0, 12.0, 15.0, 19.0], Coefficients::default(), None).unwrap();

    {
        let sink = FileSink::open(&dir).unwrap();
        sink.save_model_state("LIB", model.state()).await.unwrap();
        sink.save_model_state("GYM", model.state()).await.unwrap();
        assert!(dir.join(MODELS_FILE).exists());
    }

    let reopened = FileSink::open(&dir).unwrap();
    let loaded = reopened.load_model_state("LIB").await.unwrap().unwrap();
    assert_eq!(&loaded, model.state());
    assert!(reopened.load_model_state("POOL").await.unwrap().is_none());
    assert_eq!(reopened.persisted_zone_ids().await.unwrap(), vec!["GYM", "LIB"]);

    drop(reopened);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn predictions_are_appended_as_json_lines() {
    let dir = scratch_dir();
    let zone = Zone::new("LIB", "Library", Some(100));

    {
        let sink = FileSink::open(&dir).unwrap();
        for count in [5, 6, 7] {
            let p = Prediction::last_value(&zone, 15, count, ModelKind::LastValue, Utc::now());
            sink.save_prediction(&p).await.unwrap();
        }
        // Dropping the sink flushes and joins the writer thread.
    }

    let mut lines = Vec::new();
    for entry in std::fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        if name.starts_with("predictions_") && name.ends_with(".jsonl") {
            let raw = std::fs::read_to_string(&path).unwrap();
            lines.extend(raw.lines().map(str::to_string));
        }
    }

    assert_eq!(lines.len(), 3);
    let counts: Vec<i64> = lines
        .iter()
        .map(|l| serde_json::from_str::<Prediction>(l).unwrap().predicted_count)
        .collect();
    assert_eq!(counts, vec![5, 6, 7]);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn corrupt_checkpoint_is_reported() {
    let dir = scratch_dir();
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(MODELS_FILE), b"not a checkpoint").unwrap();

    assert!(FileSink::open(&dir).is_err());
    std::fs::remove_dir_all(&dir).unwrap();
}
