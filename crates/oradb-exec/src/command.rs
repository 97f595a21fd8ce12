//! Typed commands run inside a database pod
//!
//! Every command renders to `["bash", "-c", <script>]`. SQL and broker
//! scripts are passed through quoted heredocs so `$` in view names such as
//! `V$DATABASE` reaches the tool untouched. Secret material never appears in
//! the argv; it is streamed on the exec's stdin (see [`Command::stdin`]).
//!
//! Marker commands run under `flock` on a lock file next to the marker, so
//! each one is a single atomic step against concurrent owners.

use zeroize::Zeroizing;

/// Marker file consulted by the readiness probe and used as the switchover lock
pub const MARKER_PATH: &str = "${ORACLE_BASE}/oradata/.${ORACLE_SID}.nochk";

/// File whose presence means datafiles were created on the volume
pub const CHECKPOINT_PATH: &str = "${ORACLE_BASE}/oradata/.${ORACLE_SID}.created";

/// Printed by a marker command that wrote the marker for its owner
pub const MARKER_TAKEN: &str = "ORADB_MARKER_TAKEN";

/// Seconds a marker command waits for the lock file
const MARKER_LOCK_WAIT_SECS: u32 = 10;

const SQLPLUS: &str = "sqlplus -s / as sysdba";
const SCRIPT_EOF: &str = "ORADB_SCRIPT_EOF";

/// Where a broker command connects
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DgmgrlTarget {
    /// OS-authenticated connection to the local instance
    Local,
    /// Password-authenticated connection as SYS to a remote instance.
    ///
    /// The password is read from `password_file`, which must already exist
    /// on the pod (see [`crate::with_secret_file`]). The broker script goes
    /// to a `mktemp` file, so concurrent callers on one pod never share it.
    Remote {
        /// Easy-connect string or TNS alias
        connect: String,
        /// Path of the password file on the pod
        password_file: String,
    },
}

/// A command to run inside a database pod
#[derive(Clone, PartialEq)]
pub enum Command {
    /// SQL*Plus script run as SYSDBA
    Sql {
        /// Statements, one per line
        script: String,
    },
    /// Broker CLI script
    Dgmgrl {
        /// Connection target
        target: DgmgrlTarget,
        /// Broker commands, one per line
        script: String,
    },
    /// Write secret material to a file readable only by the pod user.
    ///
    /// The contents are sent on stdin, not in the script.
    WriteSecretFile {
        /// Absolute path on the pod
        path: String,
        /// File contents
        contents: Zeroizing<String>,
    },
    /// Remove a file, succeeding if it is absent
    RemoveFile {
        /// Absolute path on the pod
        path: String,
    },
    /// Create the marker stamped with an owner and the current time if no
    /// marker exists. Prints [`MARKER_TAKEN`] on success, otherwise the
    /// current marker contents.
    CreateMarker {
        /// Lock owner written into the marker
        owner: String,
    },
    /// Overwrite the marker only if it still holds `expected`. Prints
    /// [`MARKER_TAKEN`] on success, otherwise the current contents.
    ReplaceMarker {
        /// Lock owner written into the marker
        owner: String,
        /// Contents the marker must hold, trailing newlines stripped
        expected: String,
    },
    /// Remove the marker if `owner` holds it. Prints the contents of a
    /// marker held by someone else, which is left in place.
    RemoveMarker {
        /// Owner the marker must name
        owner: String,
    },
    /// Arbitrary shell script without secret material
    Shell {
        /// Script text
        script: String,
    },
}

/// Quote a value for inclusion in a single-quoted shell word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

impl Command {
    /// SQL*Plus script
    pub fn sql(script: impl Into<String>) -> Self {
        Self::Sql {
            script: script.into(),
        }
    }

    /// Local broker script
    pub fn dgmgrl_local(script: impl Into<String>) -> Self {
        Self::Dgmgrl {
            target: DgmgrlTarget::Local,
            script: script.into(),
        }
    }

    /// Remote broker script authenticated with a password file
    pub fn dgmgrl_remote(
        connect: impl Into<String>,
        password_file: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self::Dgmgrl {
            target: DgmgrlTarget::Remote {
                connect: connect.into(),
                password_file: password_file.into(),
            },
            script: script.into(),
        }
    }

    /// Secret file write. The file holds `contents` as one line.
    pub fn write_secret_file(path: impl Into<String>, contents: &str) -> Self {
        Self::WriteSecretFile {
            path: path.into(),
            contents: Zeroizing::new(format!("{contents}\n")),
        }
    }

    /// File removal
    pub fn remove_file(path: impl Into<String>) -> Self {
        Self::RemoveFile { path: path.into() }
    }

    /// Shell script
    pub fn shell(script: impl Into<String>) -> Self {
        Self::Shell {
            script: script.into(),
        }
    }

    /// Query the database role
    pub fn database_role() -> Self {
        Self::sql("SELECT DATABASE_ROLE FROM V$DATABASE;")
    }

    /// Query logging and flashback flags as `name:value` rows
    pub fn log_flags() -> Self {
        Self::sql(
            "SELECT 'log_mode:' || LOG_MODE AS FLAG FROM V$DATABASE\n\
             UNION ALL SELECT 'flashback_on:' || FLASHBACK_ON FROM V$DATABASE\n\
             UNION ALL SELECT 'force_logging:' || FORCE_LOGGING FROM V$DATABASE;",
        )
    }

    /// Log in over the listener as SYS with the password in `password_file`
    /// and print the session user
    pub fn verify_sys_password(password_file: &str) -> Self {
        Self::shell(format!(
            "{{ cat {}; echo 'SHOW USER'; }} | sqlplus -s -L \"sys@//localhost:1521/${{ORACLE_SID}}\" as sysdba",
            shell_quote(password_file)
        ))
    }

    /// Text streamed to the command's stdin
    pub fn stdin(&self) -> Option<&str> {
        match self {
            Self::WriteSecretFile { contents, .. } => Some(contents.as_str()),
            _ => None,
        }
    }

    /// Print "true" or "false" depending on the checkpoint file
    pub fn checkpoint_exists() -> Self {
        Self::shell(format!(
            "if [ -f \"{CHECKPOINT_PATH}\" ]; then echo true; else echo false; fi"
        ))
    }

    /// Script passed to `bash -c`
    pub fn script(&self) -> String {
        match self {
            Self::Sql { script } => heredoc(SQLPLUS, script),
            Self::Dgmgrl {
                target: DgmgrlTarget::Local,
                script,
            } => heredoc("dgmgrl -silent / as sysdba", script),
            Self::Dgmgrl {
                target:
                    DgmgrlTarget::Remote {
                        connect,
                        password_file,
                    },
                script,
            } => {
                // The password goes on stdin, so the broker script has to be a file.
                format!(
                    "cmd_file=$(mktemp /tmp/.oradb-dgmgrl.XXXXXXXX) || exit 1\n\
                     trap 'rm -f \"$cmd_file\"' EXIT\n\
                     cat > \"$cmd_file\" <<'{SCRIPT_EOF}'\n{script}\nEXIT\n{SCRIPT_EOF}\n\
                     dgmgrl -silent sys@{connect} @\"$cmd_file\" < {pwd}",
                    connect = shell_quote(connect),
                    pwd = shell_quote(password_file),
                )
            }
            Self::WriteSecretFile { path, .. } => {
                format!("umask 177 && cat > {}", shell_quote(path))
            }
            Self::RemoveFile { path } => format!("rm -f {}", shell_quote(path)),
            Self::CreateMarker { owner } => marker_locked(&format!(
                "if [ -e \"$m\" ]; then cat \"$m\"; else {} > \"$m\" && sync && echo {MARKER_TAKEN}; fi",
                stamp(owner)
            )),
            Self::ReplaceMarker { owner, expected } => marker_locked(&format!(
                "current=$(cat \"$m\" 2>/dev/null)\n\
                 if [ \"$current\" = {} ]; then {} > \"$m.new\" && mv -f \"$m.new\" \"$m\" && sync && echo {MARKER_TAKEN}; \
                 else printf '%s\\n' \"$current\"; fi",
                shell_quote(expected),
                stamp(owner)
            )),
            Self::RemoveMarker { owner } => marker_locked(&format!(
                "current=$(cat \"$m\" 2>/dev/null) || exit 0\n\
                 if [ \"${{current% *}}\" = {} ]; then rm -f \"$m\" && sync; \
                 else printf '%s\\n' \"$current\"; fi",
                shell_quote(owner)
            )),
            Self::Shell { script } => script.clone(),
        }
    }

    /// Full argv for the exec call
    pub fn argv(&self) -> Vec<String> {
        vec!["bash".to_string(), "-c".to_string(), self.script()]
    }

    /// Log-safe description. Never contains secret material.
    pub fn redacted(&self) -> String {
        match self {
            Self::WriteSecretFile { path, .. } => format!("write secret file {path}"),
            Self::Sql { script } => format!("sql: {}", first_line(script)),
            Self::Dgmgrl {
                target: DgmgrlTarget::Local,
                script,
            } => format!("dgmgrl local: {}", first_line(script)),
            Self::Dgmgrl {
                target: DgmgrlTarget::Remote { connect, .. },
                script,
            } => format!("dgmgrl {connect}: {}", first_line(script)),
            Self::RemoveFile { path } => format!("remove {path}"),
            Self::CreateMarker { owner } => format!("create marker for {owner}"),
            Self::ReplaceMarker { owner, .. } => format!("replace marker for {owner}"),
            Self::RemoveMarker { .. } => "remove marker".to_string(),
            Self::Shell { script } => format!("shell: {}", first_line(script)),
        }
    }

    /// True when the command may change broker or database state.
    ///
    /// Read-only commands are queries.
    pub fn is_mutating(&self) -> bool {
        match self {
            Self::Sql { script } | Self::Dgmgrl { script, .. } => {
                let upper = script.to_ascii_uppercase();
                !upper
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .all(|l| l.starts_with("SELECT") || l.starts_with("SHOW") || l.starts_with("UNION"))
            }
            _ => true,
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Command").field(&self.redacted()).finish()
    }
}

/// `body` run with `$m` set to the marker path, holding the marker lock
fn marker_locked(body: &str) -> String {
    format!(
        "m=\"{MARKER_PATH}\"\n\
         exec 9>\"$m.lock\" && flock -w {MARKER_LOCK_WAIT_SECS} 9 || exit 75\n{body}"
    )
}

/// Command printing `<owner> <unix-seconds>`
fn stamp(owner: &str) -> String {
    format!("printf '%s %s\\n' {} \"$(date +%s)\"", shell_quote(owner))
}

fn heredoc(tool: &str, script: &str) -> String {
    format!("{tool} <<'{SCRIPT_EOF}'\n{script}\n{SCRIPT_EOF}")
}

fn first_line(s: &str) -> &str {
    s.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_bash_argv() {
        let argv = Command::database_role().argv();
        assert_eq!(argv[0], "bash");
        assert_eq!(argv[1], "-c");
        assert!(argv[2].starts_with("sqlplus -s / as sysdba <<'ORADB_SCRIPT_EOF'"));
        assert!(argv[2].contains("V$DATABASE"));
    }

    #[test]
    fn secret_travels_on_stdin_only() {
        let cmd = Command::write_secret_file("/tmp/.oradb-1f.pwd", "s3cr3t!");
        assert_eq!(cmd.stdin(), Some("s3cr3t!\n"));
        assert!(cmd.script().starts_with("umask 177"));
        assert!(cmd.argv().iter().all(|a| !a.contains("s3cr3t!")));
        assert!(!cmd.redacted().contains("s3cr3t!"));
        assert!(!format!("{:?}", cmd).contains("s3cr3t!"));
        assert_eq!(Command::database_role().stdin(), None);
    }

    #[test]
    fn remote_dgmgrl_reads_password_from_file() {
        let cmd = Command::dgmgrl_remote(
            "orcl1-svc:1521/ORCL1",
            "/tmp/.oradb-1f.pwd",
            "SHOW CONFIGURATION;",
        );
        let script = cmd.script();
        assert!(script.contains("dgmgrl -silent sys@'orcl1-svc:1521/ORCL1'"));
        assert!(script.contains("< '/tmp/.oradb-1f.pwd'"));
        assert!(script.starts_with("cmd_file=$(mktemp "));
        assert!(script.contains("trap 'rm -f \"$cmd_file\"' EXIT"));
        assert_eq!(cmd.redacted(), "dgmgrl orcl1-svc:1521/ORCL1: SHOW CONFIGURATION;");
    }

    #[test]
    fn marker_commands_run_under_the_lock() {
        let create = Command::CreateMarker {
            owner: "prod/dg-broker".to_string(),
        };
        let replace = Command::ReplaceMarker {
            owner: "prod/dg-broker".to_string(),
            expected: "prod/sidb1 1700000000".to_string(),
        };
        let remove = Command::RemoveMarker {
            owner: "prod/dg-broker".to_string(),
        };
        for cmd in [&create, &replace, &remove] {
            let script = cmd.script();
            assert!(script.contains(".${ORACLE_SID}.nochk"));
            assert!(script.contains("flock -w 10 9 || exit 75"), "{script}");
            assert!(cmd.is_mutating());
        }
        assert!(create.script().contains("if [ -e \"$m\" ]; then cat \"$m\""));
        assert!(replace.script().contains("= 'prod/sidb1 1700000000' ]"));
        assert!(replace.script().contains("mv -f \"$m.new\" \"$m\""));
        assert!(remove.script().contains("\"${current% *}\" = 'prod/dg-broker'"));
    }

    #[test]
    fn password_check_reads_from_file() {
        let cmd = Command::verify_sys_password("/tmp/.oradb-1f.pwd");
        assert!(cmd.script().starts_with("{ cat '/tmp/.oradb-1f.pwd'; echo 'SHOW USER'; }"));
        assert!(cmd.script().contains("as sysdba"));
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn queries_are_not_mutating() {
        assert!(!Command::database_role().is_mutating());
        assert!(!Command::log_flags().is_mutating());
        assert!(!Command::dgmgrl_local("SHOW CONFIGURATION;").is_mutating());
        assert!(Command::dgmgrl_local("SWITCHOVER TO ORCL2;").is_mutating());
    }
}
