//! In-memory broker behind the PodExecutor trait
//!
//! Interprets the commands the controller sends closely enough to check
//! protocol outcomes (membership, roles, targets, markers, password files)
//! instead of asserting on individual calls.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use oradb_common::crd::DatabaseRole;
use oradb_exec::{
    Command, CommandOutput, DgmgrlTarget, ExecError, MarkerHolder, PodExecutor, PodRef, MARKER_TAKEN,
};

#[derive(Default)]
struct State {
    /// pod name → SID
    pods: BTreeMap<String, String>,
    /// SID → role, as the databases themselves report it
    roles: BTreeMap<String, DatabaseRole>,
    /// Broker members; `None` when no configuration exists
    configuration: Option<BTreeSet<String>>,
    targets: BTreeMap<String, String>,
    markers: BTreeMap<String, String>,
    secret_files: BTreeSet<(String, String)>,
    commands: Vec<(String, Command)>,
    markers_at_switchover: Vec<String>,
    fast_start_failover: bool,
    broker_starting: bool,
    reject_password: bool,
}

/// Fake set of database pods sharing one broker
#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<State>,
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// First word after `keyword` in `line`, with quotes and `;` stripped
fn word_after<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let upper = line.to_ascii_uppercase();
    let at = upper.find(keyword)? + keyword.len();
    line[at..]
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c| c == ';' || c == '\''))
}

impl FakeBroker {
    /// Pods `(pod, SID, role)` with no broker configuration yet
    pub fn with_databases(databases: &[(&str, &str, DatabaseRole)]) -> Self {
        let fake = Self::default();
        {
            let mut s = fake.state.lock().unwrap();
            for (pod, sid, role) in databases {
                s.pods.insert(pod.to_string(), sid.to_string());
                s.roles.insert(sid.to_string(), *role);
            }
        }
        fake
    }

    /// Create the configuration directly with `sids` as members
    pub fn configure(&self, sids: &[&str]) {
        self.state.lock().unwrap().configuration =
            Some(sids.iter().map(|s| s.to_string()).collect());
    }

    /// Set a target list directly
    pub fn set_targets(&self, sid: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .targets
            .insert(sid.to_string(), value.to_string());
    }

    /// Broker answers ORA-16525 until further notice
    pub fn broker_starting(&self) {
        self.state.lock().unwrap().broker_starting = true;
    }

    /// Password-authenticated connections fail with ORA-01017
    pub fn reject_password(&self) {
        self.state.lock().unwrap().reject_password = true;
    }

    /// Put a fresh marker owned by `owner` on `pod`
    pub fn hold_marker(&self, pod: &str, owner: &str) {
        self.state
            .lock()
            .unwrap()
            .markers
            .insert(pod.to_string(), format!("{owner} {}", now()));
    }

    /// Owner of the marker on `pod`
    pub fn marker_owner(&self, pod: &str) -> Option<String> {
        let s = self.state.lock().unwrap();
        s.markers
            .get(pod)
            .and_then(|c| MarkerHolder::parse(c))
            .map(|h| h.owner)
    }

    /// Pods holding a marker when the last SWITCHOVER ran
    pub fn markers_at_switchover(&self) -> Vec<String> {
        self.state.lock().unwrap().markers_at_switchover.clone()
    }

    /// Password files still present, as `pod:path`
    pub fn secret_files(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .secret_files
            .iter()
            .map(|(pod, path)| format!("{pod}:{path}"))
            .collect()
    }

    /// Broker members
    pub fn members(&self) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .configuration
            .clone()
            .unwrap_or_default()
    }

    /// Role the database `sid` reports
    pub fn role(&self, sid: &str) -> Option<DatabaseRole> {
        self.state.lock().unwrap().roles.get(sid).copied()
    }

    /// Failover targets of `sid` as a set
    pub fn targets(&self, sid: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .targets
            .get(sid)
            .map(|v| crate::group::parse_targets(v))
            .unwrap_or_default()
    }

    /// Fast-start failover state
    pub fn fast_start_failover(&self) -> bool {
        self.state.lock().unwrap().fast_start_failover
    }

    /// Every command received, redacted
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(|(pod, c)| format!("{pod}: {}", c.redacted()))
            .collect()
    }

    /// Commands that may change broker or database state
    pub fn mutating(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|(_, c)| c.is_mutating())
            .map(|(pod, c)| format!("{pod}: {}", c.redacted()))
            .collect()
    }
}

fn members_output(s: &State) -> String {
    let Some(members) = &s.configuration else {
        return "no rows selected".to_string();
    };
    let mut out = String::from("DATABASE\n--------------------\n");
    for sid in members {
        let role = s.roles.get(sid).copied().unwrap_or(DatabaseRole::Unknown);
        out.push_str(&format!("{sid}:{role}\n"));
    }
    out
}

fn broker_line(s: &mut State, line: &str) -> Result<String, String> {
    let upper = line.trim().to_ascii_uppercase();
    if upper.is_empty() || upper == "EXIT" {
        return Ok(String::new());
    }
    if upper.starts_with("CREATE CONFIGURATION") {
        let primary = word_after(line, "PRIMARY DATABASE IS").unwrap_or_default();
        s.configuration = Some(BTreeSet::from([primary.to_ascii_uppercase()]));
        return Ok(String::new());
    }
    if upper.starts_with("REMOVE CONFIGURATION") {
        s.configuration = None;
        s.targets.clear();
        s.fast_start_failover = false;
        return Ok(String::new());
    }

    let Some(members) = s.configuration.as_mut() else {
        return Err("ORA-16532: Oracle Data Guard broker configuration does not exist".into());
    };

    if upper.starts_with("SHOW CONFIGURATION") {
        Ok(format!("Configuration - dg_config\n  Members: {}", members.len()))
    } else if upper.starts_with("ADD DATABASE") {
        let sid = word_after(line, "ADD DATABASE").unwrap_or_default();
        members.insert(sid.to_ascii_uppercase());
        Ok(format!("Database \"{sid}\" added"))
    } else if upper.starts_with("REMOVE DATABASE") {
        let sid = word_after(line, "REMOVE DATABASE")
            .unwrap_or_default()
            .to_ascii_uppercase();
        if !members.remove(&sid) {
            return Err(format!("ORA-16541: database {sid} is not part of the configuration"));
        }
        s.targets.remove(&sid);
        Ok(format!("Removed database \"{sid}\" from the configuration"))
    } else if upper.starts_with("SWITCHOVER TO") {
        let target = word_after(line, "SWITCHOVER TO")
            .unwrap_or_default()
            .to_ascii_uppercase();
        s.markers_at_switchover = s.markers.keys().cloned().collect();
        for (sid, role) in s.roles.iter_mut() {
            if *role == DatabaseRole::Primary {
                *role = DatabaseRole::PhysicalStandby;
            }
            if *sid == target {
                *role = DatabaseRole::Primary;
            }
        }
        Ok(format!("Switchover succeeded, new primary is \"{target}\""))
    } else if upper.contains("SET PROPERTY FASTSTARTFAILOVERTARGET") {
        let sid = word_after(line, "EDIT DATABASE").unwrap_or_default();
        let value = line
            .split_once('=')
            .map(|(_, v)| v.trim().trim_end_matches(';').to_string())
            .unwrap_or_default();
        s.targets.insert(sid.to_ascii_uppercase(), value);
        Ok("Property \"faststartfailovertarget\" updated".into())
    } else if upper.starts_with("SHOW DATABASE") && upper.contains("FASTSTARTFAILOVERTARGET") {
        let sid = word_after(line, "SHOW DATABASE")
            .unwrap_or_default()
            .to_ascii_uppercase();
        let value = s.targets.get(&sid).cloned().unwrap_or_else(|| "''".into());
        Ok(format!("  FastStartFailoverTarget = {value}"))
    } else if upper.starts_with("ENABLE FAST_START FAILOVER") {
        s.fast_start_failover = true;
        Ok("Enabled.".into())
    } else if upper.starts_with("DISABLE FAST_START FAILOVER") {
        s.fast_start_failover = false;
        Ok("Disabled.".into())
    } else {
        Ok("Succeeded.".into())
    }
}

#[async_trait]
impl PodExecutor for FakeBroker {
    async fn exec(&self, pod: &PodRef, command: &Command) -> Result<CommandOutput, ExecError> {
        let mut s = self.state.lock().unwrap();
        s.commands.push((pod.name.clone(), command.clone()));
        let Some(sid) = s.pods.get(&pod.name).cloned() else {
            return Err(ExecError::transport(pod.to_string(), "pod not found"));
        };

        let stdout = match command {
            Command::Sql { script } if script.contains("V$DG_BROKER_CONFIG") => {
                if s.broker_starting {
                    "ORA-16525: The Oracle Data Guard broker is not yet available.".to_string()
                } else {
                    members_output(&s)
                }
            }
            Command::Sql { script } if script.contains("DATABASE_ROLE") => {
                let role = s.roles.get(&sid).copied().unwrap_or(DatabaseRole::Unknown);
                format!(
                    "DATABASE_ROLE\n----------------\n{}",
                    role.to_string().replace('_', " ")
                )
            }
            Command::Dgmgrl { target, script } => {
                if s.broker_starting {
                    return Ok(CommandOutput::stdout(
                        "ORA-16525: The Oracle Data Guard broker is not yet available.",
                    ));
                }
                if let DgmgrlTarget::Remote { password_file, .. } = target {
                    if !s
                        .secret_files
                        .contains(&(pod.name.clone(), password_file.clone()))
                    {
                        return Err(ExecError::transport(pod.to_string(), "password file missing"));
                    }
                    if s.reject_password {
                        return Ok(CommandOutput::stdout(
                            "ORA-01017: invalid username/password; logon denied",
                        ));
                    }
                }
                let mut out = Vec::new();
                for line in script.lines() {
                    match broker_line(&mut s, line) {
                        Ok(text) => out.push(text),
                        Err(text) => {
                            out.push(text);
                            break;
                        }
                    }
                }
                out.join("\n")
            }
            Command::WriteSecretFile { path, .. } => {
                s.secret_files.insert((pod.name.clone(), path.clone()));
                String::new()
            }
            Command::RemoveFile { path } => {
                s.secret_files.remove(&(pod.name.clone(), path.clone()));
                String::new()
            }
            Command::CreateMarker { owner } => match s.markers.get(&pod.name) {
                Some(current) => current.clone(),
                None => {
                    s.markers.insert(pod.name.clone(), format!("{owner} {}", now()));
                    MARKER_TAKEN.to_string()
                }
            },
            Command::ReplaceMarker { owner, expected } => {
                let current = s.markers.get(&pod.name).cloned().unwrap_or_default();
                if current == *expected {
                    s.markers.insert(pod.name.clone(), format!("{owner} {}", now()));
                    MARKER_TAKEN.to_string()
                } else {
                    current
                }
            }
            Command::RemoveMarker { owner } => match s.markers.get(&pod.name) {
                Some(current)
                    if MarkerHolder::parse(current).is_some_and(|h| h.owner == *owner) =>
                {
                    s.markers.remove(&pod.name);
                    String::new()
                }
                Some(current) => current.clone(),
                None => String::new(),
            },
            Command::Sql { .. } | Command::Shell { .. } => String::new(),
        };
        Ok(CommandOutput::stdout(stdout))
    }
}
