use pairwise_vqa_eval::aggregate::aggregate_dir;
use pairwise_vqa_eval::dataset::{Protocol, load_data_by_skill};
use pairwise_vqa_eval::persistence::read_results;
use pairwise_vqa_eval::runner::{EvalConfig, Evaluator};
use pairwise_vqa_eval::{CandidateScores, ErrorKind, ScoreStatus, ScriptedModel};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const RECORD: &str = r#"{"skill": "relative_agents", "images": ["196.png", "197.png"], "choices": ["Only agent1 can see the truck", "Only agent2 can see the truck", "Neither agent can see the truck", "Both agents can see the truck"], "ground_truth": 3, "question": "Which agents can see the white truck?"}"#;

fn workspace(lines: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let skill_dir = dir.path().join("data/relative_agents");
    fs::create_dir_all(&skill_dir).unwrap();
    fs::write(skill_dir.join("relative_agents.jsonl"), lines.join("\n")).unwrap();

    let images = dir.path().join("images");
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("196.png"), b"").unwrap();
    fs::write(images.join("197.png"), b"").unwrap();
    dir
}

fn eval_config(dir: &Path) -> EvalConfig {
    EvalConfig {
        model_name: "stub".to_string(),
        image_dir: dir.join("images"),
        output_dir: dir.join("scores"),
        ..Default::default()
    }
}

#[tokio::test]
async fn confident_stub_answers_correctly() {
    let dir = workspace(&[RECORD]);
    let skills = load_data_by_skill(&dir.path().join("data"), None, &Protocol::default()).unwrap();
    let model = ScriptedModel::fixed(CandidateScores::Probabilities(vec![0.0, 0.0, 0.0, 1.0]));

    let summary = Evaluator::new(eval_config(dir.path()))
        .run(&skills, &model)
        .await
        .unwrap();

    let results = read_results(&summary.outputs[0].path).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].predicted_index, Some(3));
    assert!(results[0].is_correct);
    assert_eq!(results[0].images, vec!["196.png", "197.png"]);
    assert_eq!(results[0].skill, "relative agents");
}

#[tokio::test]
async fn uniform_stub_breaks_tie_to_first_choice() {
    let dir = workspace(&[RECORD]);
    let skills = load_data_by_skill(&dir.path().join("data"), None, &Protocol::default()).unwrap();
    let model = ScriptedModel::uniform(4);

    let summary = Evaluator::new(eval_config(dir.path()))
        .run(&skills, &model)
        .await
        .unwrap();

    let results = read_results(&summary.outputs[0].path).unwrap();
    assert_eq!(results[0].predicted_index, Some(0));
    assert!(!results[0].is_correct);
    let total: f64 = results[0].probabilities.iter().sum();
    assert!((total - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn malformed_and_failing_records_do_not_stop_the_sweep() {
    let five_choices = r#"{"images": ["196.png", "197.png"], "choices": ["a", "b", "c", "d", "e"], "ground_truth": 0, "question": "q"}"#;
    let gt_out_of_range = r#"{"images": ["196.png", "197.png"], "choices": ["a", "b", "c", "d"], "ground_truth": 4, "question": "q"}"#;
    let three_images = r#"{"images": ["196.png", "197.png", "198.png"], "choices": ["a", "b", "c", "d"], "ground_truth": 0, "question": "q"}"#;
    let missing_image = r#"{"images": ["196.png", "199.png"], "choices": ["a", "b", "c", "d"], "ground_truth": 0, "question": "q"}"#;

    let dir = workspace(&[
        five_choices,
        RECORD,
        gt_out_of_range,
        three_images,
        missing_image,
        RECORD,
    ]);
    let skills = load_data_by_skill(&dir.path().join("data"), None, &Protocol::default()).unwrap();
    assert_eq!(skills[0].len(), 3);
    assert_eq!(skills[0].rejected_count(), 3);

    let model = ScriptedModel::new(
        "flaky",
        vec![
            Ok(CandidateScores::Logits(vec![0.0, 0.0, 0.0, 3.0])),
            Err("backend exception".to_string()),
        ],
    );
    let summary = Evaluator::new(eval_config(dir.path()))
        .run(&skills, &model)
        .await
        .unwrap();

    assert_eq!(summary.scored(), 1);
    assert_eq!(summary.errored(), 5);

    let results = read_results(&summary.outputs[0].path).unwrap();
    let kinds: Vec<Option<ErrorKind>> = results
        .iter()
        .map(|r| match &r.status {
            ScoreStatus::Scored => None,
            ScoreStatus::Errored { kind, .. } => Some(*kind),
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(ErrorKind::MalformedRecord),
            Some(ErrorKind::MalformedRecord),
            Some(ErrorKind::MalformedRecord),
            None,
            Some(ErrorKind::MissingImage),
            Some(ErrorKind::Inference),
        ]
    );

    let report = aggregate_dir(&dir.path().join("scores")).unwrap();
    let method = report.method("flaky").unwrap();
    assert_eq!(method.overall.total, 6);
    assert_eq!(method.overall.scored, 1);
    assert_eq!(method.overall.accuracy, 1.0);
}

#[tokio::test]
async fn aggregation_reports_exact_fractions() {
    let dir = TempDir::new().unwrap();
    let images = dir.path().join("images");
    fs::create_dir_all(&images).unwrap();
    fs::write(images.join("196.png"), b"").unwrap();
    fs::write(images.join("197.png"), b"").unwrap();

    // Ten records per skill; the stub always answers "4", so the number of
    // records whose ground truth is 3 is the number correct.
    for (skill, correct) in [("navigation", 6), ("distance_awareness", 3)] {
        let skill_dir = dir.path().join("data").join(skill);
        fs::create_dir_all(&skill_dir).unwrap();
        let lines: Vec<String> = (0..10)
            .map(|i| {
                let gt = if i < correct { 3 } else { 0 };
                format!(
                    r#"{{"images": ["196.png", "197.png"], "choices": ["a", "b", "c", "d"], "ground_truth": {gt}, "question": "q{i}"}}"#
                )
            })
            .collect();
        fs::write(skill_dir.join(format!("{skill}.jsonl")), lines.join("\n")).unwrap();
    }

    let skills = load_data_by_skill(&dir.path().join("data"), None, &Protocol::default()).unwrap();
    let model = ScriptedModel::fixed(CandidateScores::Probabilities(vec![0.1, 0.1, 0.1, 0.7]));
    Evaluator::new(eval_config(dir.path()))
        .run(&skills, &model)
        .await
        .unwrap();

    let report = aggregate_dir(&dir.path().join("scores")).unwrap();
    let method = report.method("scripted").unwrap();

    let by_skill: Vec<(&str, f64)> = method
        .skills
        .iter()
        .map(|s| (s.skill.as_str(), s.accuracy.accuracy))
        .collect();
    assert_eq!(
        by_skill,
        vec![("distance awareness", 3.0 / 10.0), ("navigation", 6.0 / 10.0)]
    );
    assert_eq!(method.overall.scored, 20);
    assert_eq!(method.overall.accuracy, 9.0 / 20.0);
}
