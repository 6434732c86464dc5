pub(super) const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS email_threads (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    subject TEXT,
    last_message_at TEXT,
    participants TEXT NOT NULL DEFAULT '',
    is_hidden INTEGER NOT NULL DEFAULT 0,
    is_processed INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT
);

CREATE INDEX IF NOT EXISTS email_threads_user_idx
    ON email_threads(user_id, is_hidden);

CREATE TABLE IF NOT EXISTS emails (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    remote_message_id TEXT,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS emails_thread_idx
    ON emails(user_id, thread_id, received_at);

CREATE TABLE IF NOT EXISTS deferred_emails (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    thread_id TEXT NOT NULL,
    defer_until TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS deferred_emails_due_idx
    ON deferred_emails(user_id, processed, defer_until);

CREATE TABLE IF NOT EXISTS mail_accounts (
    user_id TEXT PRIMARY KEY,
    access_token TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub(super) const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS email_threads (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    subject TEXT,
    last_message_at TIMESTAMPTZ,
    participants TEXT[] NOT NULL DEFAULT '{}',
    is_hidden BOOLEAN NOT NULL DEFAULT false,
    is_processed BOOLEAN NOT NULL DEFAULT false,
    processed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS email_threads_user_idx
    ON email_threads(user_id, is_hidden);

CREATE TABLE IF NOT EXISTS emails (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    thread_id UUID NOT NULL,
    remote_message_id TEXT,
    received_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS emails_thread_idx
    ON emails(user_id, thread_id, received_at);

CREATE TABLE IF NOT EXISTS deferred_emails (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    thread_id UUID NOT NULL,
    defer_until TIMESTAMPTZ NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT false,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS deferred_emails_due_idx
    ON deferred_emails(user_id, processed, defer_until);

CREATE TABLE IF NOT EXISTS mail_accounts (
    user_id UUID PRIMARY KEY,
    access_token TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;
