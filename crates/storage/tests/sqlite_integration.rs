use chrono::Duration;
use quiz_core::model::{
    Certification, CertificationId, Choice, ChoiceId, CompletionJob, JobStatus,
    LeaderboardAttempt, Question, QuestionId, QuizSession, SessionAnswer, SessionId,
    SessionOutcome, Subtopic, SubtopicId, TimePeriod, UserId,
};
use quiz_core::time::fixed_now;
use storage::repository::{
    AnswerCommit, CompletionQueue, IdentityDirectory, LeaderboardRepository, QuestionBank,
    SessionRepository, StatisticsRepository, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn question(id: u64, subtopic: Option<u64>) -> Question {
    Question {
        id: QuestionId::new(id),
        certification_id: CertificationId::new(1),
        subtopic_id: subtopic.map(SubtopicId::new),
        text: format!("Question {id}?"),
        explanation: Some(format!("Because {id}.")),
        choices: vec![
            Choice {
                id: ChoiceId::new(id * 10 + 1),
                text: "right".into(),
                is_correct: true,
            },
            Choice {
                id: ChoiceId::new(id * 10 + 2),
                text: "wrong".into(),
                is_correct: false,
            },
        ],
    }
}

async fn seed_bank(repo: &SqliteRepository) {
    repo.upsert_certification(&Certification {
        id: CertificationId::new(1),
        name: "Cloud Practitioner".into(),
    })
    .await
    .unwrap();
    repo.upsert_subtopic(&Subtopic {
        id: SubtopicId::new(7),
        certification_id: CertificationId::new(1),
        name: "Billing".into(),
    })
    .await
    .unwrap();
    for id in 1..=4 {
        let subtopic = if id % 2 == 0 { Some(7) } else { None };
        repo.upsert_question(&question(id, subtopic)).await.unwrap();
    }
}

fn answer_commit(session: &QuizSession, question: u64, is_correct: bool) -> AnswerCommit {
    let expected_version = session.version();
    let mut updated = session.clone();
    let position = updated.current_index();
    let at = fixed_now() + Duration::seconds(30 * i64::from(position + 1));
    updated.record_answer(is_correct, at).unwrap();
    AnswerCommit {
        answer: SessionAnswer {
            session_id: session.id(),
            question_id: QuestionId::new(question),
            selected_choice_id: ChoiceId::new(question * 10 + 1),
            is_correct,
            position,
            answered_at: at,
        },
        completion: CompletionJob::for_completed(&updated, at),
        session: updated,
        expected_version,
    }
}

#[tokio::test]
async fn sqlite_question_bank_reads_pools_and_choices() {
    let repo = connect("memdb_bank").await;
    seed_bank(&repo).await;
    repo.upsert_user(UserId::new(3), "ada").await.unwrap();

    let cert = repo.certification(CertificationId::new(1)).await.unwrap();
    assert_eq!(cert.unwrap().name, "Cloud Practitioner");
    assert!(
        repo.subtopic(CertificationId::new(2), SubtopicId::new(7))
            .await
            .unwrap()
            .is_none()
    );

    let all = repo
        .question_pool(CertificationId::new(1), None)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    let billing = repo
        .question_pool(CertificationId::new(1), Some(SubtopicId::new(7)))
        .await
        .unwrap();
    assert_eq!(billing, vec![QuestionId::new(2), QuestionId::new(4)]);

    let q = repo.question(QuestionId::new(3)).await.unwrap().unwrap();
    assert_eq!(q.choices.len(), 2);
    assert_eq!(q.correct_choice().map(|c| c.id), Some(ChoiceId::new(31)));

    assert_eq!(
        repo.username(UserId::new(3)).await.unwrap().as_deref(),
        Some("ada")
    );
}

#[tokio::test]
async fn sqlite_session_commits_are_atomic_and_versioned() {
    let repo = connect("memdb_sessions").await;
    seed_bank(&repo).await;

    let session = QuizSession::start(
        SessionId::random(),
        UserId::new(1),
        CertificationId::new(1),
        None,
        vec![QuestionId::new(1), QuestionId::new(2)],
        fixed_now(),
    )
    .unwrap();
    repo.insert_session(&session).await.unwrap();

    let first = answer_commit(&session, 1, true);
    repo.commit_answer(&first).await.unwrap();

    // stale version: nothing from this commit may land
    let stale = answer_commit(&session, 2, false);
    let err = repo.commit_answer(&stale).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    assert_eq!(repo.list_answers(session.id()).await.unwrap().len(), 1);

    let dup = answer_commit(&first.session, 1, false);
    assert!(matches!(
        repo.commit_answer(&dup).await.unwrap_err(),
        StorageError::Conflict(_)
    ));

    let last = answer_commit(&first.session, 2, false);
    repo.commit_answer(&last).await.unwrap();

    let stored = repo
        .get_session(UserId::new(1), session.id())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_completed());
    assert_eq!(stored.correct_answers(), 1);
    assert_eq!(stored.incorrect_answers(), 1);
    assert_eq!(stored.question_ids(), session.question_ids());
    assert_eq!(stored, last.session);

    let job = repo.get_job(session.id()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.score_percentage(), 50);

    assert!(
        repo.get_session(UserId::new(2), session.id())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sqlite_lists_sessions_newest_first_within_range() {
    let repo = connect("memdb_list_sessions").await;
    for hours in [0, 2, 4] {
        let s = QuizSession::start(
            SessionId::random(),
            UserId::new(1),
            CertificationId::new(1),
            None,
            vec![QuestionId::new(1)],
            fixed_now() - Duration::hours(hours),
        )
        .unwrap();
        repo.insert_session(&s).await.unwrap();
    }

    let all = repo
        .list_sessions(UserId::new(1), None, None, 10)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert!(all[0].started_at() > all[1].started_at());

    let ranged = repo
        .list_sessions(
            UserId::new(1),
            Some(fixed_now() - Duration::hours(3)),
            Some(fixed_now() - Duration::hours(1)),
            10,
        )
        .await
        .unwrap();
    assert_eq!(ranged.len(), 1);
    assert_eq!(ranged[0].started_at(), fixed_now() - Duration::hours(2));
}

#[tokio::test]
async fn sqlite_outbox_retries_and_requeues() {
    let repo = connect("memdb_outbox").await;
    let session = QuizSession::start(
        SessionId::random(),
        UserId::new(1),
        CertificationId::new(1),
        None,
        vec![QuestionId::new(1)],
        fixed_now(),
    )
    .unwrap();
    repo.insert_session(&session).await.unwrap();
    repo.commit_answer(&answer_commit(&session, 1, true))
        .await
        .unwrap();

    let later = fixed_now() + Duration::minutes(5);
    assert_eq!(repo.due_jobs(later, 10).await.unwrap().len(), 1);

    repo.mark_retry(session.id(), 1, later + Duration::minutes(1), "sink down")
        .await
        .unwrap();
    assert!(repo.due_jobs(later, 10).await.unwrap().is_empty());

    repo.mark_failed(session.id(), 2, "sink down").await.unwrap();
    assert_eq!(repo.requeue_failed(later).await.unwrap(), 1);
    let job = repo.get_job(session.id()).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.last_error.as_deref(), Some("sink down"));

    repo.mark_done(session.id(), 3).await.unwrap();
    assert!(repo.due_jobs(later, 10).await.unwrap().is_empty());
    assert!(matches!(
        repo.mark_done(SessionId::random(), 1).await,
        Err(StorageError::NotFound)
    ));
}

#[tokio::test]
async fn sqlite_statistics_apply_once_per_session() {
    let repo = connect("memdb_statistics").await;
    let outcome = |score: u32, correct: u32| SessionOutcome {
        session_id: SessionId::random(),
        user_id: UserId::new(1),
        certification_id: CertificationId::new(1),
        certification_name: "Cloud Practitioner".into(),
        questions_answered: 5,
        correct_answers: correct,
        score_percentage: score,
        study_seconds: 90,
        completed_at: fixed_now(),
    };

    let first = outcome(80, 4);
    assert!(repo.apply_outcome(&first).await.unwrap());
    assert!(!repo.apply_outcome(&first).await.unwrap());
    assert!(repo.apply_outcome(&outcome(60, 3)).await.unwrap());

    let stats = repo.user_statistics(UserId::new(1)).await.unwrap().unwrap();
    assert_eq!(stats.totals.sessions, 2);
    assert_eq!(stats.totals.average_score(), 70.0);
    assert_eq!(stats.totals.best_score, 80);
    assert_eq!(stats.totals.accuracy(), 70.0);
    assert_eq!(stats.totals.study_seconds, 180);
    assert_eq!(stats.totals.last_session_at, Some(fixed_now()));

    let perf = repo
        .list_certification_performance(UserId::new(1))
        .await
        .unwrap();
    assert_eq!(perf.len(), 1);
    assert_eq!(perf[0].totals, stats.totals);
}

#[tokio::test]
async fn sqlite_leaderboard_orders_filters_and_ranks() {
    let repo = connect("memdb_leaderboard").await;
    let now = fixed_now();
    let attempt = |user: u64, score: u32, at| LeaderboardAttempt {
        session_id: SessionId::random(),
        user_id: UserId::new(user),
        username: format!("user{user}"),
        certification_id: CertificationId::new(1),
        score,
        attempt_at: at,
    };

    for (user, score, hours_ago) in [(1, 70, 1), (2, 90, 1), (3, 90, 5), (4, 40, 200)] {
        let a = attempt(user, score, now - Duration::hours(hours_ago));
        assert!(
            repo.record_attempt(&a, &[TimePeriod::AllTime, TimePeriod::Weekly])
                .await
                .unwrap()
        );
    }
    let repeat = attempt(1, 95, now);
    assert!(repo.record_attempt(&repeat, &[TimePeriod::AllTime]).await.unwrap());
    assert!(!repo.record_attempt(&repeat, &[TimePeriod::AllTime]).await.unwrap());

    let (page, total) = repo
        .page(CertificationId::new(1), TimePeriod::AllTime, None, 0, 10)
        .await
        .unwrap();
    assert_eq!(total, 4);
    let users: Vec<u64> = page.iter().map(|e| e.user_id.value()).collect();
    assert_eq!(users, vec![1, 3, 2, 4]);
    assert_eq!(page[0].quizzes_taken, 2);
    assert_eq!(page[0].average_score(), 82.5);

    let since = TimePeriod::Weekly.window_start(now);
    let (weekly, total) = repo
        .page(CertificationId::new(1), TimePeriod::Weekly, since, 0, 10)
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert!(weekly.iter().all(|e| e.user_id != UserId::new(4)));

    let entry = repo
        .entry(CertificationId::new(1), TimePeriod::AllTime, UserId::new(2))
        .await
        .unwrap()
        .unwrap();
    let ahead = repo
        .count_ahead(
            CertificationId::new(1),
            TimePeriod::AllTime,
            None,
            &entry.standing_key(),
        )
        .await
        .unwrap();
    assert_eq!(ahead, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_leaderboard_total_matches_page_under_concurrent_writes() {
    let path = std::env::temp_dir().join(format!("quiz-board-{}.sqlite3", SessionId::random()));
    let url = format!("sqlite://{}?mode=rwc", path.display());
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");

    let writer = {
        let repo = repo.clone();
        tokio::spawn(async move {
            for user in 1..=40_u64 {
                let attempt = LeaderboardAttempt {
                    session_id: SessionId::random(),
                    user_id: UserId::new(user),
                    username: format!("user{user}"),
                    certification_id: CertificationId::new(1),
                    score: u32::try_from(user % 100).unwrap(),
                    attempt_at: fixed_now(),
                };
                repo.record_attempt(&attempt, &[TimePeriod::AllTime])
                    .await
                    .unwrap();
            }
        })
    };

    while !writer.is_finished() {
        let (page, total) = repo
            .page(CertificationId::new(1), TimePeriod::AllTime, None, 0, 100)
            .await
            .unwrap();
        assert_eq!(page.len() as u64, total);
    }
    writer.await.unwrap();

    let (page, total) = repo
        .page(CertificationId::new(1), TimePeriod::AllTime, None, 0, 100)
        .await
        .unwrap();
    assert_eq!(total, 40);
    assert_eq!(page.len(), 40);

    repo.pool().close().await;
    let _ = std::fs::remove_file(&path);
}
