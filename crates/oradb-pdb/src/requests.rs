//! Gateway request bodies for each lifecycle action

use serde_json::{json, Map, Value};
use zeroize::Zeroizing;

use oradb_common::crd::{PdbAction, PluggableDatabaseSpec};

use crate::gateway::{GatewayRequest, Verb, PDB_API_PATH};

/// PDB administrator created together with the PDB
pub struct AdminCredentials {
    /// User name
    pub user: Zeroizing<String>,
    /// Password
    pub password: Zeroizing<String>,
}

/// `<state>-<option>` as recorded after a Modify
pub fn modify_key(spec: &PluggableDatabaseSpec) -> String {
    format!(
        "{}-{}",
        spec.pdb_state.map(|s| s.to_string()).unwrap_or_default(),
        spec.modify_option.as_deref().unwrap_or_default()
    )
}

fn flag(value: bool) -> Value {
    Value::String(value.to_string())
}

fn put_opt(body: &mut Map<String, Value>, key: &str, value: Option<&String>) {
    if let Some(v) = value.filter(|v| !v.is_empty()) {
        body.insert(key.to_string(), Value::String(v.clone()));
    }
}

fn put_sizing(body: &mut Map<String, Value>, spec: &PluggableDatabaseSpec) {
    put_opt(body, "fileNameConversions", spec.file_name_conversions.as_ref());
    put_opt(body, "totalSize", spec.total_size.as_ref());
    put_opt(body, "tempSize", spec.temp_size.as_ref());
    body.insert("reuseTempFile".into(), flag(spec.reuse_temp_file));
    body.insert("unlimitedStorage".into(), flag(spec.unlimited_storage));
}

fn pdb_path(name: &str) -> String {
    format!("{PDB_API_PATH}{name}/")
}

/// Request carrying out `spec.action`.
///
/// `admin` is only read for Create.
pub fn action_request(
    spec: &PluggableDatabaseSpec,
    admin: Option<&AdminCredentials>,
) -> GatewayRequest {
    let mut body = Map::new();
    body.insert("getScript".into(), flag(spec.get_script));

    let (verb, path) = match spec.action {
        PdbAction::Create => {
            body.insert("method".into(), json!(spec.action.method()));
            body.insert("pdb_name".into(), json!(spec.pdb_name));
            if let Some(admin) = admin {
                body.insert("adminName".into(), json!(admin.user.as_str()));
                body.insert("adminPwd".into(), json!(admin.password.as_str()));
            }
            put_sizing(&mut body, spec);
            (Verb::Post, PDB_API_PATH.to_string())
        }
        PdbAction::Clone => {
            body.insert("method".into(), json!(spec.action.method()));
            body.insert("clonePDBName".into(), json!(spec.pdb_name));
            put_sizing(&mut body, spec);
            let source = spec.src_pdb_name.as_deref().unwrap_or_default();
            (Verb::Post, pdb_path(source))
        }
        PdbAction::Plug => {
            body.insert("method".into(), json!(spec.action.method()));
            body.insert("pdb_name".into(), json!(spec.pdb_name));
            put_opt(&mut body, "xmlFileName", spec.xml_file_name.as_ref());
            body.insert("asClone".into(), flag(spec.as_clone));
            put_sizing(&mut body, spec);
            (Verb::Post, PDB_API_PATH.to_string())
        }
        PdbAction::Unplug => {
            body.insert("method".into(), json!(spec.action.method()));
            put_opt(&mut body, "xmlFileName", spec.xml_file_name.as_ref());
            (Verb::Post, pdb_path(&spec.pdb_name))
        }
        PdbAction::Modify => {
            if let Some(state) = spec.pdb_state {
                body.insert("state".into(), json!(state.to_string()));
            }
            put_opt(&mut body, "modifyOption", spec.modify_option.as_ref());
            (Verb::Post, format!("{PDB_API_PATH}{}/status", spec.pdb_name))
        }
        PdbAction::Delete => return drop_request(spec),
    };

    GatewayRequest {
        verb,
        path,
        body: Some(Value::Object(body)),
    }
}

/// Request dropping the PDB
pub fn drop_request(spec: &PluggableDatabaseSpec) -> GatewayRequest {
    GatewayRequest {
        verb: Verb::Delete,
        path: pdb_path(&spec.pdb_name),
        body: Some(json!({
            "method": PdbAction::Delete.method(),
            "action": spec.drop_action.to_string(),
            "getScript": spec.get_script.to_string(),
        })),
    }
}

/// Request reading the open mode
pub fn status_request(spec: &PluggableDatabaseSpec) -> GatewayRequest {
    GatewayRequest {
        verb: Verb::Get,
        path: format!("{PDB_API_PATH}{}/status", spec.pdb_name),
        body: None,
    }
}

/// `open_mode` from a status response
pub fn open_mode(response: &Value) -> Option<String> {
    response
        .get("open_mode")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use oradb_common::crd::{DropAction, PdbState};

    fn spec(action: PdbAction) -> PluggableDatabaseSpec {
        serde_json::from_value(json!({
            "cdbResName": "cdb-dev",
            "pdbName": "pdbdev",
            "action": action,
            "webServerUser": {"secretName": "ords", "secretKey": "user"},
            "webServerPwd": {"secretName": "ords", "secretKey": "pwd"}
        }))
        .unwrap()
    }

    #[test]
    fn create_posts_to_collection_with_admin() {
        let mut s = spec(PdbAction::Create);
        s.total_size = Some("1G".to_string());
        let admin = AdminCredentials {
            user: Zeroizing::new("pdbadmin".to_string()),
            password: Zeroizing::new("pw".to_string()),
        };

        let request = action_request(&s, Some(&admin));
        assert_eq!(request.verb, Verb::Post);
        assert_eq!(request.path, "/ords/_/db-api/latest/database/pdbs/");
        let body = request.body.unwrap();
        assert_eq!(body["method"], "CREATE");
        assert_eq!(body["pdb_name"], "pdbdev");
        assert_eq!(body["adminName"], "pdbadmin");
        assert_eq!(body["totalSize"], "1G");
        assert_eq!(body["unlimitedStorage"], "false");
        assert!(body.get("tempSize").is_none());
    }

    #[test]
    fn clone_posts_to_source() {
        let mut s = spec(PdbAction::Clone);
        s.src_pdb_name = Some("pdbseed".to_string());
        let request = action_request(&s, None);
        assert_eq!(request.path, "/ords/_/db-api/latest/database/pdbs/pdbseed/");
        assert_eq!(request.body.unwrap()["clonePDBName"], "pdbdev");
    }

    #[test]
    fn modify_posts_state() {
        let mut s = spec(PdbAction::Modify);
        s.pdb_state = Some(PdbState::Close);
        s.modify_option = Some("IMMEDIATE".to_string());
        let request = action_request(&s, None);
        assert_eq!(request.path, "/ords/_/db-api/latest/database/pdbs/pdbdev/status");
        let body = request.body.unwrap();
        assert_eq!(body["state"], "CLOSE");
        assert_eq!(body["modifyOption"], "IMMEDIATE");
        assert_eq!(modify_key(&s), "CLOSE-IMMEDIATE");
    }

    #[test]
    fn delete_carries_drop_action() {
        let mut s = spec(PdbAction::Delete);
        s.drop_action = DropAction::Including;
        let request = action_request(&s, None);
        assert_eq!(request.verb, Verb::Delete);
        assert_eq!(request.body.unwrap()["action"], "INCLUDING");
    }

    #[test]
    fn open_mode_is_read_from_status() {
        assert_eq!(
            open_mode(&json!({"open_mode": "MOUNTED"})).as_deref(),
            Some("MOUNTED")
        );
        assert_eq!(open_mode(&Value::Null), None);
        assert_eq!(status_request(&spec(PdbAction::Create)).verb, Verb::Get);
    }
}
