//! Versioned schema migrations, applied in order against a fresh or
//! existing database on open.

pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "decisions, participant_stances, decision_similarities",
    up: r#"
        CREATE TABLE IF NOT EXISTS decisions (
            id TEXT PRIMARY KEY,
            question TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            consensus TEXT NOT NULL DEFAULT '',
            winning_option TEXT,
            convergence_status TEXT NOT NULL,
            participants TEXT NOT NULL DEFAULT '[]',
            transcript_path TEXT NOT NULL DEFAULT '',
            metadata TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS participant_stances (
            rowid INTEGER PRIMARY KEY AUTOINCREMENT,
            decision_id TEXT NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
            participant TEXT NOT NULL,
            vote_option TEXT,
            confidence REAL,
            rationale TEXT,
            final_position TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS decision_similarities (
            source_id TEXT NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
            target_id TEXT NOT NULL REFERENCES decisions(id) ON DELETE CASCADE,
            similarity_score REAL NOT NULL,
            computed_at TEXT NOT NULL,
            PRIMARY KEY (source_id, target_id)
        );

        CREATE INDEX IF NOT EXISTS idx_decisions_timestamp
            ON decisions(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_decisions_question
            ON decisions(question);
        CREATE INDEX IF NOT EXISTS idx_stances_decision_id
            ON participant_stances(decision_id);
        CREATE INDEX IF NOT EXISTS idx_similarities_source_id
            ON decision_similarities(source_id);
        CREATE INDEX IF NOT EXISTS idx_similarities_score
            ON decision_similarities(similarity_score DESC);
    "#,
}];
