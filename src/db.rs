use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::curriculum::InMemoryCurriculumIndex;
use crate::models::{
    exclusion_key, CohortMember, CompletionRecord, CurriculumKey, CurriculumTree, ExamResult,
    ExclusionSet, LearnerInputs, Program, Scope, ScopedExclusions, StudySession,
};
use crate::risk::next_login_streak;

/// Which learners a cohort query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CohortScope {
    Class(String),
    Institution(String),
}

impl CohortScope {
    pub fn label(&self) -> &str {
        match self {
            CohortScope::Class(label) | CohortScope::Institution(label) => label,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerProfile {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub institution_id: String,
    pub class_labels: Vec<String>,
    pub last_login: Option<String>,
    pub login_streak: i32,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn upsert_learner(
    pool: &PgPool,
    id: Uuid,
    name: &str,
    email: &str,
    institution_id: &str,
    class_labels: &[&str],
    key: &CurriculumKey,
    last_login: Option<String>,
) -> anyhow::Result<Uuid> {
    let class_labels: Vec<String> = class_labels.iter().map(|c| c.to_string()).collect();
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO cohort_analytics.learners
        (id, display_name, email, institution_id, class_labels, program, board, level, last_login)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (email) DO UPDATE
        SET display_name = EXCLUDED.display_name,
            institution_id = EXCLUDED.institution_id,
            class_labels = EXCLUDED.class_labels,
            last_login = EXCLUDED.last_login
        RETURNING id
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(institution_id)
    .bind(&class_labels)
    .bind(key.program.as_str())
    .bind(&key.board)
    .bind(&key.level)
    .bind(last_login)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn insert_exclusion(
    pool: &PgPool,
    scope: Scope,
    scope_id: &str,
    subject: &str,
    chapter: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cohort_analytics.exclusions (scope, scope_id, exclusion_key, excluded)
        VALUES ($1, $2, $3, TRUE)
        ON CONFLICT (scope, scope_id, exclusion_key) DO UPDATE SET excluded = TRUE
        "#,
    )
    .bind(scope.as_str())
    .bind(scope_id)
    .bind(exclusion_key(subject, chapter))
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_exam(
    pool: &PgPool,
    learner_id: Uuid,
    result: &ExamResult,
    source_key: &str,
) -> anyhow::Result<bool> {
    let outcome = sqlx::query(
        r#"
        INSERT INTO cohort_analytics.exam_results
        (id, learner_id, exam_date, subject, test_type, score, max_score, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(learner_id)
    .bind(&result.date)
    .bind(&result.subject)
    .bind(&result.test_type)
    .bind(result.score)
    .bind(result.max_score)
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(outcome.rows_affected() > 0)
}

async fn insert_session(
    pool: &PgPool,
    session: &StudySession,
    source_key: &str,
) -> anyhow::Result<bool> {
    let outcome = sqlx::query(
        r#"
        INSERT INTO cohort_analytics.study_sessions
        (id, learner_id, started_at, duration_secs, local_hour, local_weekday, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(session.learner_id)
    .bind(session.started_at)
    .bind(i64::try_from(session.duration_secs).unwrap_or(i64::MAX))
    .bind(session.local_hour.map(i16::from))
    .bind(session.local_weekday.map(i16::from))
    .bind(source_key)
    .execute(pool)
    .await?;
    Ok(outcome.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let key = CurriculumKey::new(Program::HighSchool, "CBSE", Some("10"));
    let curriculum = [
        ("Mathematics", "Real Numbers", "Euclid's Division Lemma"),
        ("Mathematics", "Polynomials", "Zeroes of a Polynomial"),
        ("Mathematics", "Trigonometry", "Trigonometric Ratios"),
        ("Mathematics", "Statistics", "Mean of Grouped Data"),
        ("Science", "Chemical Reactions", "Balancing Equations"),
        ("Science", "Light", "Refraction"),
        ("Science", "Electricity", "Ohm's Law"),
    ];

    for (subject, chapter, topic) in curriculum {
        sqlx::query(
            r#"
            INSERT INTO cohort_analytics.curriculum_chapters
            (program, board, level, subject, chapter, topic)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(key.program.as_str())
        .bind(&key.board)
        .bind(key.level.as_deref().unwrap_or(""))
        .bind(subject)
        .bind(chapter)
        .bind(topic)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let days_ago = |days: i64| (now - Duration::days(days)).date_naive().to_string();

    let learners = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Avery Lee",
            "avery.lee@example.edu",
            Some(days_ago(12)),
            [82.0, 74.0, 66.0],
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Jules Moreno",
            "jules.moreno@example.edu",
            Some(days_ago(1)),
            [58.0, 64.0, 71.0],
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Kiara Patel",
            "kiara.patel@example.edu",
            Some(days_ago(2)),
            [91.0, 80.0, 72.0],
        ),
    ];

    for (id, name, email, last_login, percentages) in learners {
        let learner_id =
            upsert_learner(pool, id, name, email, "northside-high", &["10-A"], &key, last_login)
                .await?;

        for (index, pct) in percentages.iter().enumerate() {
            let exam_day = 40 - (index as i64) * 14;
            let result = ExamResult::new(
                &days_ago(exam_day),
                "Mathematics",
                &format!("Unit Test {}", index + 1),
                *pct,
                100.0,
            );
            insert_exam(pool, learner_id, &result, &format!("seed-exam-{email}-{index}")).await?;
        }

        for day in 0..10i64 {
            let started_at = now - Duration::days(day) - Duration::hours(2);
            let session = StudySession {
                learner_id,
                started_at,
                duration_secs: 1800 + (day as u64 % 3) * 600,
                local_hour: Some(18 + (day % 3) as u8),
                local_weekday: u8::try_from(started_at.weekday().num_days_from_monday()).ok(),
            };
            insert_session(pool, &session, &format!("seed-session-{email}-{day}")).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO cohort_analytics.chapter_completions
            (learner_id, subject, chapter, completed)
            VALUES ($1, 'Mathematics', 'Real Numbers', TRUE), ($1, 'Science', 'Light', TRUE)
            ON CONFLICT (learner_id, subject, chapter) DO UPDATE SET completed = EXCLUDED.completed
            "#,
        )
        .bind(learner_id)
        .execute(pool)
        .await?;
    }

    insert_exclusion(
        pool,
        Scope::Institution,
        "northside-high",
        "Mathematics",
        "Statistics",
    )
    .await?;
    insert_exclusion(pool, Scope::Class, "10-A", "Science", "Electricity").await?;
    insert_exclusion(
        pool,
        Scope::Personal,
        "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
        "Mathematics",
        "Trigonometry",
    )
    .await?;

    info!("seeded three learners in class 10-A");
    Ok(())
}

pub async fn load_curriculum_index(
    pool: &PgPool,
    default_board: Option<&str>,
) -> anyhow::Result<InMemoryCurriculumIndex> {
    let rows = sqlx::query(
        "SELECT program, board, level, subject, chapter, topic \
         FROM cohort_analytics.curriculum_chapters",
    )
    .fetch_all(pool)
    .await
    .context("failed to load curriculum")?;

    let mut trees: HashMap<CurriculumKey, CurriculumTree> = HashMap::new();
    for row in rows {
        let program: String = row.get("program");
        let Ok(program) = program.parse::<Program>() else {
            warn!(program = %program, "skipping curriculum row with unknown program");
            continue;
        };
        let level: String = row.get("level");
        let topic: String = row.get("topic");
        let key = CurriculumKey {
            program,
            board: row.get("board"),
            level: (!level.is_empty()).then_some(level),
        };
        let subject: String = row.get("subject");
        let chapter: String = row.get("chapter");
        trees.entry(key).or_default().add_chapter(
            &subject,
            &chapter,
            (!topic.is_empty()).then_some(topic.as_str()),
        );
    }

    let mut index = InMemoryCurriculumIndex::new();
    if let Some(board) = default_board {
        index = index.with_default_board(board);
    }
    for (key, tree) in trees {
        index.insert(key, tree);
    }
    Ok(index)
}

async fn fetch_exclusion_set(
    pool: &PgPool,
    scope: Scope,
    scope_id: &str,
) -> anyhow::Result<ExclusionSet> {
    let rows = sqlx::query(
        "SELECT exclusion_key, excluded FROM cohort_analytics.exclusions \
         WHERE scope = $1 AND scope_id = $2",
    )
    .bind(scope.as_str())
    .bind(scope_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("exclusion_key"), row.get::<bool, _>("excluded")))
        .collect())
}

async fn fetch_completion(pool: &PgPool, learner_id: Uuid) -> anyhow::Result<CompletionRecord> {
    let rows = sqlx::query(
        "SELECT subject, chapter, completed FROM cohort_analytics.chapter_completions \
         WHERE learner_id = $1",
    )
    .bind(learner_id)
    .fetch_all(pool)
    .await?;

    let mut completion = CompletionRecord::default();
    for row in rows {
        let subject: String = row.get("subject");
        let chapter: String = row.get("chapter");
        completion.mark(&subject, &chapter, row.get("completed"));
    }
    Ok(completion)
}

async fn fetch_exam_results(
    pool: &PgPool,
    learner_ids: &[Uuid],
) -> anyhow::Result<HashMap<Uuid, Vec<ExamResult>>> {
    let rows = sqlx::query(
        "SELECT learner_id, exam_date, subject, test_type, score, max_score \
         FROM cohort_analytics.exam_results \
         WHERE learner_id = ANY($1) \
         ORDER BY exam_date",
    )
    .bind(learner_ids)
    .fetch_all(pool)
    .await?;

    let mut results: HashMap<Uuid, Vec<ExamResult>> = HashMap::new();
    for row in rows {
        results
            .entry(row.get("learner_id"))
            .or_default()
            .push(ExamResult {
                date: row.get("exam_date"),
                subject: row.get("subject"),
                test_type: row.get("test_type"),
                score: row.get("score"),
                max_score: row.get("max_score"),
            });
    }
    Ok(results)
}

fn session_from_row(row: &PgRow) -> StudySession {
    let duration_secs: i64 = row.get("duration_secs");
    let local_hour: Option<i16> = row.get("local_hour");
    let local_weekday: Option<i16> = row.get("local_weekday");
    StudySession {
        learner_id: row.get("learner_id"),
        started_at: row.get("started_at"),
        duration_secs: u64::try_from(duration_secs).unwrap_or(0),
        local_hour: local_hour.and_then(|h| u8::try_from(h).ok()),
        local_weekday: local_weekday.and_then(|d| u8::try_from(d).ok()),
    }
}

async fn fetch_sessions(
    pool: &PgPool,
    learner_ids: &[Uuid],
    since: DateTime<Utc>,
) -> anyhow::Result<HashMap<Uuid, Vec<StudySession>>> {
    let rows = sqlx::query(
        "SELECT learner_id, started_at, duration_secs, local_hour, local_weekday \
         FROM cohort_analytics.study_sessions \
         WHERE learner_id = ANY($1) AND started_at >= $2",
    )
    .bind(learner_ids)
    .bind(since)
    .fetch_all(pool)
    .await?;

    let mut sessions: HashMap<Uuid, Vec<StudySession>> = HashMap::new();
    for row in rows {
        let session = session_from_row(&row);
        sessions.entry(session.learner_id).or_default().push(session);
    }
    Ok(sessions)
}

fn profile_from_row(row: &PgRow) -> LearnerProfile {
    LearnerProfile {
        id: row.get("id"),
        display_name: row.get("display_name"),
        email: row.get("email"),
        institution_id: row.get("institution_id"),
        class_labels: row.get("class_labels"),
        last_login: row.get("last_login"),
        login_streak: row.get("login_streak"),
    }
}

const LEARNER_COLUMNS: &str = "id, display_name, email, institution_id, class_labels, program, \
     board, level, subject_filter, last_login, login_streak";

/// Loads everything the engine needs for one learner. Sessions older than
/// `sessions_since` are not fetched.
pub async fn fetch_learner_inputs(
    pool: &PgPool,
    email: &str,
    sessions_since: DateTime<Utc>,
) -> anyhow::Result<Option<(LearnerProfile, LearnerInputs)>> {
    let query = format!("SELECT {LEARNER_COLUMNS} FROM cohort_analytics.learners WHERE email = $1");
    let Some(row) = sqlx::query(&query).bind(email).fetch_optional(pool).await? else {
        return Ok(None);
    };

    let profile = profile_from_row(&row);
    let program: String = row.get("program");
    let curriculum = CurriculumKey {
        program: program.parse::<Program>()?,
        board: row.get("board"),
        level: row.get("level"),
    };

    let mut classes = Vec::with_capacity(profile.class_labels.len());
    for label in &profile.class_labels {
        classes.push(fetch_exclusion_set(pool, Scope::Class, label).await?);
    }
    let exclusions = ScopedExclusions {
        institution: fetch_exclusion_set(pool, Scope::Institution, &profile.institution_id).await?,
        classes,
        personal: fetch_exclusion_set(pool, Scope::Personal, &profile.id.to_string()).await?,
    };

    let ids = [profile.id];
    let exam_results = fetch_exam_results(pool, &ids)
        .await?
        .remove(&profile.id)
        .unwrap_or_default();
    let sessions = fetch_sessions(pool, &ids, sessions_since)
        .await?
        .remove(&profile.id)
        .unwrap_or_default();

    let inputs = LearnerInputs {
        curriculum,
        subject_filter: row.get("subject_filter"),
        exclusions,
        completion: fetch_completion(pool, profile.id).await?,
        exam_results,
        sessions,
    };
    Ok(Some((profile, inputs)))
}

pub async fn fetch_cohort(
    pool: &PgPool,
    scope: &CohortScope,
    sessions_since: DateTime<Utc>,
) -> anyhow::Result<Vec<CohortMember>> {
    let mut query = format!("SELECT {LEARNER_COLUMNS} FROM cohort_analytics.learners");
    match scope {
        CohortScope::Class(_) => query.push_str(" WHERE $1 = ANY(class_labels)"),
        CohortScope::Institution(_) => query.push_str(" WHERE institution_id = $1"),
    }
    query.push_str(" ORDER BY display_name");

    let rows = sqlx::query(&query)
        .bind(scope.label())
        .fetch_all(pool)
        .await?;
    let profiles: Vec<LearnerProfile> = rows.iter().map(profile_from_row).collect();
    let ids: Vec<Uuid> = profiles.iter().map(|p| p.id).collect();

    let mut exams = fetch_exam_results(pool, &ids).await?;
    let mut sessions = fetch_sessions(pool, &ids, sessions_since).await?;

    Ok(profiles
        .into_iter()
        .map(|profile| {
            let class_label = match scope {
                CohortScope::Class(label) => label.clone(),
                CohortScope::Institution(_) if profile.class_labels.is_empty() => {
                    "unassigned".to_string()
                }
                CohortScope::Institution(_) => profile.class_labels.join(", "),
            };
            CohortMember {
                learner_id: profile.id,
                display_name: profile.display_name,
                class_label,
                last_login: profile.last_login,
                exam_results: exams.remove(&profile.id).unwrap_or_default(),
                sessions: sessions.remove(&profile.id).unwrap_or_default(),
            }
        })
        .collect())
}

/// Stamps a login for `email` and advances the login streak. Returns the new
/// streak, or `None` if no such learner exists.
pub async fn record_login(
    pool: &PgPool,
    email: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<u32>> {
    let Some(row) = sqlx::query(
        "SELECT last_login, login_streak FROM cohort_analytics.learners WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let last_login: Option<String> = row.get("last_login");
    let streak: i32 = row.get("login_streak");
    let today = now.date_naive();
    let next = next_login_streak(last_login.as_deref(), u32::try_from(streak).unwrap_or(0), today);

    sqlx::query(
        "UPDATE cohort_analytics.learners SET last_login = $1, login_streak = $2 WHERE email = $3",
    )
    .bind(today.to_string())
    .bind(i32::try_from(next).unwrap_or(i32::MAX))
    .bind(email)
    .execute(pool)
    .await?;

    Ok(Some(next))
}

async fn learner_id_for(pool: &PgPool, email: &str) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query("SELECT id FROM cohort_analytics.learners WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|row| row.get("id")))
}

pub async fn import_exam_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        email: String,
        exam_date: String,
        #[serde(default)]
        subject: String,
        #[serde(default)]
        test_type: String,
        #[serde(deserialize_with = "csv::invalid_option")]
        score: Option<f64>,
        #[serde(deserialize_with = "csv::invalid_option")]
        max_score: Option<f64>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;
    let mut learner_ids: HashMap<String, Option<Uuid>> = HashMap::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let learner_id = match learner_ids.get(&row.email) {
            Some(id) => *id,
            None => {
                let id = learner_id_for(pool, &row.email).await?;
                learner_ids.insert(row.email.clone(), id);
                id
            }
        };
        let Some(learner_id) = learner_id else {
            warn!(email = %row.email, "skipping exam for unknown learner");
            continue;
        };

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let exam = ExamResult {
            date: row.exam_date,
            subject: row.subject,
            test_type: row.test_type,
            score: row.score,
            max_score: row.max_score,
        };

        if insert_exam(pool, learner_id, &exam, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn import_session_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        email: String,
        started_at: DateTime<Utc>,
        duration_secs: u64,
        #[serde(deserialize_with = "csv::invalid_option")]
        local_hour: Option<u8>,
        #[serde(deserialize_with = "csv::invalid_option")]
        local_weekday: Option<u8>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;
    let mut learner_ids: HashMap<String, Option<Uuid>> = HashMap::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let learner_id = match learner_ids.get(&row.email) {
            Some(id) => *id,
            None => {
                let id = learner_id_for(pool, &row.email).await?;
                learner_ids.insert(row.email.clone(), id);
                id
            }
        };
        let Some(learner_id) = learner_id else {
            warn!(email = %row.email, "skipping session for unknown learner");
            continue;
        };

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let session = StudySession {
            learner_id,
            started_at: row.started_at,
            duration_secs: row.duration_secs,
            local_hour: row.local_hour,
            local_weekday: row.local_weekday,
        };

        if insert_session(pool, &session, &source_key).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}
