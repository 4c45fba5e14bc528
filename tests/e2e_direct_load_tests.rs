//! End-to-end tests for direct-mode loads into an on-disk warehouse.

mod common;

use common::*;
use songplay_warehouse::transform::MatchPolicy;
use songplay_warehouse::{PipelineConfig, RunState, SqliteWarehouse, TargetStore};

fn chim_catalog(data: &TestData) {
    data.write_catalog(
        "A/R/T/TRAACER128F4290F96.json",
        &catalog_doc(CHIM_SONG_ID, CHIM_TITLE, TRENIERS_ID, TRENIERS_NAME, CHIM_DURATION),
    );
}

#[test]
fn test_chim_chim_cheree_play_is_matched() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_log(
        "2018/11/2018-11-12-events.json",
        &[play_line(
            TS_NOV_12,
            USER_KATE,
            "free",
            605,
            CHIM_TITLE,
            TRENIERS_NAME,
            CHIM_DURATION,
        )],
    );

    let report = data.run_direct();
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.units_total, 2);
    assert_eq!(report.units_processed, 2);
    assert_eq!(report.failed_units(), 0);
    assert_eq!(report.written.songplays, 1);
    assert_eq!(report.unmatched_songplays, 0);

    let warehouse = data.open_warehouse();
    let plays = warehouse.read_songplays().unwrap();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].fact.song_id.as_deref(), Some(CHIM_SONG_ID));
    assert_eq!(plays[0].fact.artist_id.as_deref(), Some(TRENIERS_ID));
    assert_eq!(plays[0].fact.user_id, USER_KATE);
    assert_eq!(plays[0].fact.session_id, 605);

    let times = warehouse.read_times().unwrap();
    assert_eq!(times.len(), 1);
    assert_eq!(
        (times[0].hour, times[0].day, times[0].week, times[0].month, times[0].year, times[0].weekday),
        (2, 12, 46, 11, 2018, 0)
    );
}

#[test]
fn test_login_lines_produce_no_rows() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_log(
        "2018/11/2018-11-12-events.json",
        &[
            event_line("Login", TS_NOV_12, USER_KATE, "free", 605),
            event_line("Home", TS_NOV_12_LATER, USER_KATE, "free", 605),
        ],
    );

    let report = data.run_direct();
    assert_eq!(report.state, RunState::Done);
    assert!(report.parse_errors.is_empty());

    let counts = report.table_counts.unwrap();
    assert_eq!(counts.songplays, 0);
    assert_eq!(counts.users, 0);
    assert_eq!(counts.time, 0);
    assert_eq!(counts.songs, 1);
}

#[test]
fn test_unmatched_play_keeps_fact_with_null_keys() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_log(
        "2018/11/2018-11-12-events.json",
        &[play_line(
            TS_NOV_12,
            USER_SYLVIE,
            "free",
            345,
            MERCY_TITLE,
            PAVEMENT_NAME,
            MERCY_DURATION,
        )],
    );

    let report = data.run_direct();
    assert_eq!(report.unmatched_songplays, 1);
    let counts = report.table_counts.unwrap();
    assert_eq!(counts.songplays, 1);
    assert_eq!(counts.unmatched_songplays, 1);

    let plays = data.open_warehouse().read_songplays().unwrap();
    assert!(plays[0].fact.song_id.is_none());
    assert!(plays[0].fact.artist_id.is_none());
}

#[test]
fn test_reloaded_miss_is_not_reported_again() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_log(
        "2018/11/2018-11-12-events.json",
        &[play_line(
            TS_NOV_12,
            USER_SYLVIE,
            "free",
            345,
            MERCY_TITLE,
            PAVEMENT_NAME,
            MERCY_DURATION,
        )],
    );

    let first = data.run_direct();
    assert_eq!(first.written.songplays, 1);
    assert_eq!(first.unmatched_songplays, 1);

    let second = data.run_direct();
    assert_eq!(second.written.songplays, 0);
    assert_eq!(second.unmatched_songplays, 0);

    // staged mode over the same data agrees
    let staged = data.run_staged();
    assert_eq!(staged.state, RunState::Done);
    assert_eq!(staged.written.songplays, 0);
    assert_eq!(staged.unmatched_songplays, 0);
    assert_eq!(staged.table_counts.unwrap().unmatched_songplays, 1);
}

#[test]
fn test_duration_tolerance_is_configurable() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_log(
        "2018/11/2018-11-12-events.json",
        &[play_line(TS_NOV_12, USER_KATE, "free", 605, CHIM_TITLE, TRENIERS_NAME, 192.58)],
    );

    let strict = data.run_direct();
    assert_eq!(strict.unmatched_songplays, 1);

    // same play, already stored as a miss, stays as it is
    let tolerant = data.run_direct_with(PipelineConfig {
        policy: MatchPolicy::with_tolerance(0.01),
    });
    assert_eq!(tolerant.written.songplays, 0);

    let other = TestData::new();
    chim_catalog(&other);
    other.write_log(
        "2018/11/2018-11-12-events.json",
        &[play_line(TS_NOV_12, USER_KATE, "free", 605, CHIM_TITLE, TRENIERS_NAME, 192.58)],
    );
    let report = other.run_direct_with(PipelineConfig {
        policy: MatchPolicy::with_tolerance(0.01),
    });
    assert_eq!(report.unmatched_songplays, 0);
    let plays = other.open_warehouse().read_songplays().unwrap();
    assert_eq!(plays[0].fact.song_id.as_deref(), Some(CHIM_SONG_ID));
}

#[test]
fn test_bad_files_are_isolated() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_catalog("A/R/T/TRBROKEN.json", "{\"song_id\": \"SOBROKEN\",");
    data.write_log(
        "2018/11/2018-11-12-events.json",
        &[play_line(
            TS_NOV_12,
            USER_KATE,
            "free",
            605,
            CHIM_TITLE,
            TRENIERS_NAME,
            CHIM_DURATION,
        )],
    );
    // the valid first line must not land when a later line is malformed
    data.write_log(
        "2018/11/2018-11-13-events.json",
        &[
            play_line(
                TS_NOV_15,
                USER_SYLVIE,
                "free",
                345,
                MERCY_TITLE,
                PAVEMENT_NAME,
                MERCY_DURATION,
            ),
            "{\"page\": \"NextSong\", \"ts\":".to_string(),
        ],
    );

    let report = data.run_direct();
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.units_total, 4);
    assert_eq!(report.units_processed, 4);
    assert_eq!(report.parse_errors.len(), 2);
    assert!(report
        .parse_errors
        .iter()
        .any(|err| err.file().as_str().ends_with("TRBROKEN.json")));

    let warehouse = data.open_warehouse();
    let users = warehouse.read_users().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, USER_KATE);
    assert_eq!(warehouse.read_songplays().unwrap().len(), 1);
}

#[test]
fn test_anonymous_play_rejects_its_file() {
    let data = TestData::new();
    chim_catalog(&data);
    let mut anonymous: serde_json::Value = serde_json::from_str(&play_line(
        TS_NOV_12,
        USER_KATE,
        "free",
        605,
        CHIM_TITLE,
        TRENIERS_NAME,
        CHIM_DURATION,
    ))
    .unwrap();
    anonymous["userId"] = serde_json::json!("");
    data.write_log("2018/11/2018-11-12-events.json", &[anonymous.to_string()]);

    let report = data.run_direct();
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.parse_errors.len(), 1);
    assert_eq!(report.table_counts.unwrap().songplays, 0);
}

#[test]
fn test_user_keeps_latest_level() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_log(
        "2018/11/a-events.json",
        &[
            play_line(TS_NOV_12, USER_KATE, "free", 605, CHIM_TITLE, TRENIERS_NAME, CHIM_DURATION),
            play_line(TS_NOV_15, USER_KATE, "paid", 700, CHIM_TITLE, TRENIERS_NAME, CHIM_DURATION),
        ],
    );
    // loaded after, but observed before the upgrade
    data.write_log(
        "2018/11/b-events.json",
        &[play_line(
            TS_NOV_12_LATER,
            USER_KATE,
            "free",
            606,
            CHIM_TITLE,
            TRENIERS_NAME,
            CHIM_DURATION,
        )],
    );

    let report = data.run_direct();
    assert_eq!(report.state, RunState::Done);

    let users = data.open_warehouse().read_users().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].level, "paid");
    assert_eq!(users[0].level_observed_at, TS_NOV_15);

    // facts keep the level seen at play time
    let plays = data.open_warehouse().read_songplays().unwrap();
    let levels: Vec<&str> = plays.iter().map(|play| play.fact.level.as_str()).collect();
    assert_eq!(levels, vec!["free", "paid", "free"]);
}

#[test]
fn test_reload_is_idempotent() {
    let data = TestData::new();
    chim_catalog(&data);
    data.write_catalog(
        "A/R/M/TRAMERCY128F42.json",
        &catalog_doc(MERCY_SONG_ID, MERCY_TITLE, PAVEMENT_ID, PAVEMENT_NAME, MERCY_DURATION),
    );
    data.write_log(
        "2018/11/2018-11-12-events.json",
        &[
            play_line(TS_NOV_12, USER_KATE, "free", 605, CHIM_TITLE, TRENIERS_NAME, CHIM_DURATION),
            event_line("Logout", TS_NOV_12_LATER, USER_KATE, "free", 605),
            play_line(
                TS_NOV_15,
                USER_SYLVIE,
                "paid",
                345,
                MERCY_TITLE,
                PAVEMENT_NAME,
                MERCY_DURATION,
            ),
        ],
    );

    let first = data.run_direct();
    let second = data.run_direct();
    assert_eq!(second.state, RunState::Done);
    assert_eq!(second.written.total(), 0);
    assert_eq!(first.table_counts, second.table_counts);

    let counts = second.table_counts.unwrap();
    assert_eq!(counts.artists, 2);
    assert_eq!(counts.songs, 2);
    assert_eq!(counts.users, 2);
    assert_eq!(counts.time, 2);
    assert_eq!(counts.songplays, 2);
    assert_eq!(counts.unmatched_songplays, 0);
}

#[test]
fn test_empty_roots_finish_with_nothing_loaded() {
    let data = TestData::new();
    let report = data.run_direct();
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.units_total, 0);
    assert_eq!(report.written.total(), 0);
}

#[test]
fn test_corrupt_warehouse_is_a_connection_error() {
    let data = TestData::new();
    std::fs::write(&data.db_path, vec![0x42u8; 4096]).unwrap();
    let err = SqliteWarehouse::open(&data.db_path).err().unwrap();
    assert!(err.is_connection(), "unexpected error: {err}");
}

#[test]
fn test_counts_survive_reopen() {
    let data = TestData::new();
    chim_catalog(&data);
    data.run_direct();
    let mut warehouse = data.open_warehouse();
    assert_eq!(warehouse.table_counts().unwrap().songs, 1);
}
