//! Xcode project (`project.pbxproj`) inspection and signing settings rewrite

use super::{Platform, ProjectInspector, Target};
use crate::error::{ProvisionError, Result};
use plist::{Dictionary, Value};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

const NATIVE_TARGET_ISA: &str = "PBXNativeTarget";
const APPLICATION_PRODUCT_TYPE: &str = "com.apple.product-type.application";

/// Maximum nesting of `$(VAR)` references resolved in one setting
const MAX_EXPANSION_DEPTH: usize = 8;

/// An `.xcodeproj` bundle loaded for one build configuration.
///
/// `project.pbxproj` is read in any plist encoding and written back as XML,
/// which Xcode accepts and converts on its next save.
pub struct XcodeProject {
    pbxproj_path: PathBuf,
    document: Dictionary,
    project_id: String,
    targets: Vec<Target>,
    target_ids: Vec<String>,
    team_id: Option<String>,
    codesign_identity: Option<String>,
    managed_signing: bool,
    dirty: bool,
}

/// Target facts gathered before entitlements are read from disk
struct PendingTarget {
    id: String,
    name: String,
    bundle_id: String,
    entitlements_path: Option<PathBuf>,
    platform: Platform,
}

impl XcodeProject {
    /// Load a project.
    ///
    /// # Arguments
    /// * `project_path` - Path to the `.xcodeproj` bundle
    /// * `main_target` - Target to sign; defaults to the first application target
    /// * `configuration` - Build configuration; defaults to the project default
    pub async fn open(
        project_path: &Path,
        main_target: Option<&str>,
        configuration: Option<&str>,
    ) -> Result<Self> {
        if project_path.extension().and_then(|ext| ext.to_str()) != Some("xcodeproj") {
            return Err(ProvisionError::InvalidConfig(format!(
                "project path must point to an .xcodeproj bundle: {}",
                project_path.display()
            )));
        }

        let pbxproj_path = project_path.join("project.pbxproj");
        let bytes = tokio::fs::read(&pbxproj_path).await.map_err(|e| {
            ProvisionError::ProjectState(format!("failed to read {}: {e}", pbxproj_path.display()))
        })?;
        let document = Value::from_reader(Cursor::new(bytes))?
            .into_dictionary()
            .ok_or_else(|| ProvisionError::ProjectState("project.pbxproj is not a dictionary".to_string()))?;

        let source_root = project_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let project_name = project_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_string();

        let (project_id, inspected) = {
            let graph = ProjectGraph::new(&document)?;
            let project_id = graph.project_id.to_string();
            let inspected = graph.inspect(main_target, configuration, &source_root, &project_name)?;
            (project_id, inspected)
        };

        let mut targets = Vec::with_capacity(inspected.targets.len());
        let mut target_ids = Vec::with_capacity(inspected.targets.len());
        for pending in inspected.targets {
            let entitlements = match &pending.entitlements_path {
                Some(path) => read_entitlements(path).await?,
                None => Dictionary::new(),
            };
            target_ids.push(pending.id);
            targets.push(Target {
                name: pending.name,
                bundle_id: pending.bundle_id,
                entitlements,
                platform: pending.platform,
            });
        }

        Ok(Self {
            pbxproj_path,
            document,
            project_id,
            targets,
            target_ids,
            team_id: inspected.team_id,
            codesign_identity: inspected.codesign_identity,
            managed_signing: inspected.managed_signing,
            dirty: false,
        })
    }

    fn target_configuration_ids(&self, target_id: &str) -> Result<Vec<String>> {
        let graph = ProjectGraph::new(&self.document)?;
        let target = graph.object(target_id)?;
        let list_id = required_string(target, "buildConfigurationList")?;
        Ok(id_list(graph.object(list_id)?, "buildConfigurations")
            .into_iter()
            .map(str::to_string)
            .collect())
    }
}

impl ProjectInspector for XcodeProject {
    fn targets(&self) -> &[Target] {
        &self.targets
    }

    fn main_target(&self) -> &Target {
        // `open` guarantees the main target is present and first
        &self.targets[0]
    }

    fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    fn codesign_identity(&self) -> Option<&str> {
        self.codesign_identity.as_deref()
    }

    fn uses_managed_signing(&self) -> bool {
        self.managed_signing
    }

    fn force_code_sign_properties(
        &mut self,
        target_name: &str,
        team_id: &str,
        identity: &str,
        profile_uuid: &str,
    ) -> Result<()> {
        let index = self
            .targets
            .iter()
            .position(|target| target.name == target_name)
            .ok_or_else(|| ProvisionError::ProjectState(format!("unknown target: {target_name}")))?;
        let target_id = self.target_ids[index].clone();
        let conditional_identity_key =
            format!("CODE_SIGN_IDENTITY[sdk={}*]", self.targets[index].platform.sdk_name());
        let configuration_ids = self.target_configuration_ids(&target_id)?;

        let objects = self
            .document
            .get_mut("objects")
            .and_then(Value::as_dictionary_mut)
            .ok_or_else(|| ProvisionError::ProjectState("project has no objects".to_string()))?;

        for configuration_id in &configuration_ids {
            let configuration = objects
                .get_mut(configuration_id)
                .and_then(Value::as_dictionary_mut)
                .ok_or_else(|| {
                    ProvisionError::ProjectState(format!("missing build configuration {configuration_id}"))
                })?;
            let settings = child_dictionary_mut(configuration, "buildSettings")?;

            set_string(settings, "DEVELOPMENT_TEAM", team_id);
            set_string(settings, "CODE_SIGN_STYLE", "Manual");
            set_string(settings, "CODE_SIGN_IDENTITY", identity);
            set_string(settings, &conditional_identity_key, identity);
            set_string(settings, "PROVISIONING_PROFILE", profile_uuid);
            set_string(settings, "PROVISIONING_PROFILE_SPECIFIER", "");
        }

        let project = objects
            .get_mut(&self.project_id)
            .and_then(Value::as_dictionary_mut)
            .ok_or_else(|| ProvisionError::ProjectState("missing root project object".to_string()))?;
        let attributes = child_dictionary_mut(project, "attributes")?;
        let target_attributes = child_dictionary_mut(attributes, "TargetAttributes")?;
        let entry = child_dictionary_mut(target_attributes, &target_id)?;
        set_string(entry, "DevelopmentTeam", team_id);
        set_string(entry, "ProvisioningStyle", "Manual");

        self.dirty = true;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let mut buffer = Vec::new();
        Value::Dictionary(self.document.clone()).to_writer_xml(&mut buffer)?;
        tokio::fs::write(&self.pbxproj_path, buffer).await?;
        crate::debug!("saved {}", self.pbxproj_path.display());
        Ok(())
    }
}

struct InspectedProject {
    targets: Vec<PendingTarget>,
    team_id: Option<String>,
    codesign_identity: Option<String>,
    managed_signing: bool,
}

/// Borrowed view over the pbxproj object table
struct ProjectGraph<'a> {
    objects: &'a Dictionary,
    project_id: &'a str,
    project: &'a Dictionary,
}

impl<'a> ProjectGraph<'a> {
    fn new(document: &'a Dictionary) -> Result<Self> {
        let objects = document
            .get("objects")
            .and_then(Value::as_dictionary)
            .ok_or_else(|| ProvisionError::ProjectState("project has no objects".to_string()))?;
        let project_id = required_string(document, "rootObject")?;
        let project = objects
            .get(project_id)
            .and_then(Value::as_dictionary)
            .ok_or_else(|| ProvisionError::ProjectState("missing root project object".to_string()))?;

        Ok(Self {
            objects,
            project_id,
            project,
        })
    }

    fn object(&self, id: &str) -> Result<&'a Dictionary> {
        self.objects
            .get(id)
            .and_then(Value::as_dictionary)
            .ok_or_else(|| ProvisionError::ProjectState(format!("missing project object {id}")))
    }

    fn build_settings(&self, list_id: &str, configuration: &str) -> Result<Option<&'a Dictionary>> {
        for id in id_list(self.object(list_id)?, "buildConfigurations") {
            let config = self.object(id)?;
            if config.get("name").and_then(Value::as_string) == Some(configuration) {
                return Ok(config.get("buildSettings").and_then(Value::as_dictionary));
            }
        }
        Ok(None)
    }

    fn target_attribute(&self, target_id: &str, key: &str) -> Option<&'a str> {
        self.project
            .get("attributes")
            .and_then(Value::as_dictionary)
            .and_then(|attributes| attributes.get("TargetAttributes"))
            .and_then(Value::as_dictionary)
            .and_then(|targets| targets.get(target_id))
            .and_then(Value::as_dictionary)
            .and_then(|target| target.get(key))
            .and_then(Value::as_string)
    }

    fn inspect(
        &self,
        main_target: Option<&str>,
        configuration: Option<&str>,
        source_root: &Path,
        project_name: &str,
    ) -> Result<InspectedProject> {
        let project_list = required_string(self.project, "buildConfigurationList")?;
        let configuration = match configuration {
            Some(name) => name.to_string(),
            None => self.default_configuration(project_list)?,
        };
        crate::debug!("using build configuration: {configuration}");

        let project_settings = self.build_settings(project_list, &configuration)?;

        let native_targets: Vec<(&'a str, &'a Dictionary)> = id_list(self.project, "targets")
            .into_iter()
            .map(|id| Ok((id, self.object(id)?)))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|(_, target)| target.get("isa").and_then(Value::as_string) == Some(NATIVE_TARGET_ISA))
            .collect();

        let main_id = match main_target {
            Some(name) => native_targets
                .iter()
                .find(|(_, target)| target.get("name").and_then(Value::as_string) == Some(name))
                .map(|(id, _)| *id)
                .ok_or_else(|| ProvisionError::ProjectState(format!("target not found: {name}")))?,
            None => native_targets
                .iter()
                .find(|(_, target)| {
                    target
                        .get("productType")
                        .and_then(Value::as_string)
                        .is_some_and(|product| product.starts_with(APPLICATION_PRODUCT_TYPE))
                })
                .map(|(id, _)| *id)
                .ok_or_else(|| ProvisionError::ProjectState("no application target found".to_string()))?,
        };

        // Main target, then its dependencies breadth first
        let native_ids: HashSet<&str> = native_targets.iter().map(|(id, _)| *id).collect();
        let mut ordered = vec![main_id];
        let mut seen: HashSet<&str> = HashSet::from([main_id]);
        let mut cursor = 0;
        while cursor < ordered.len() {
            let target = self.object(ordered[cursor])?;
            for dependency_id in id_list(target, "dependencies") {
                let dependency = self.object(dependency_id)?;
                if let Some(target_id) = dependency.get("target").and_then(Value::as_string)
                    && native_ids.contains(target_id)
                    && seen.insert(target_id)
                {
                    ordered.push(target_id);
                }
            }
            cursor += 1;
        }

        let mut targets = Vec::with_capacity(ordered.len());
        let mut main_settings = None;
        for target_id in ordered {
            let target = self.object(target_id)?;
            let name = required_string(target, "name")?.to_string();
            let target_settings = self.build_settings(
                required_string(target, "buildConfigurationList")?,
                &configuration,
            )?;
            let settings = BuildSettings {
                project: project_settings,
                target: target_settings,
                target_name: &name,
                source_root,
                project_name,
            };

            let bundle_id = settings.expanded("PRODUCT_BUNDLE_IDENTIFIER")?.ok_or_else(|| {
                ProvisionError::ProjectState(format!("no bundle identifier for target: {name}"))
            })?;
            let platform = settings
                .raw("SDKROOT")
                .and_then(Platform::from_sdk_root)
                .unwrap_or(Platform::Ios);
            let entitlements_path = settings
                .expanded("CODE_SIGN_ENTITLEMENTS")?
                .filter(|path| !path.is_empty())
                .map(|path| source_root.join(path));

            if main_settings.is_none() {
                main_settings = Some((
                    settings.expanded("DEVELOPMENT_TEAM")?.filter(|team| !team.is_empty()),
                    settings
                        .raw(&format!("CODE_SIGN_IDENTITY[sdk={}*]", platform.sdk_name()))
                        .or_else(|| settings.raw("CODE_SIGN_IDENTITY"))
                        .filter(|identity| !identity.is_empty() && *identity != "-")
                        .map(str::to_string),
                    settings.raw("CODE_SIGN_STYLE") == Some("Automatic"),
                ));
            }

            targets.push(PendingTarget {
                id: target_id.to_string(),
                name,
                bundle_id,
                entitlements_path,
                platform,
            });
        }

        let (settings_team, codesign_identity, automatic_style) = main_settings.unwrap_or_default();
        let team_id = settings_team
            .or_else(|| self.target_attribute(main_id, "DevelopmentTeam").map(str::to_string));
        let managed_signing = automatic_style
            || self.target_attribute(main_id, "ProvisioningStyle") == Some("Automatic");

        Ok(InspectedProject {
            targets,
            team_id,
            codesign_identity,
            managed_signing,
        })
    }

    fn default_configuration(&self, list_id: &str) -> Result<String> {
        let list = self.object(list_id)?;
        if let Some(name) = list.get("defaultConfigurationName").and_then(Value::as_string) {
            return Ok(name.to_string());
        }
        let first = id_list(list, "buildConfigurations")
            .into_iter()
            .next()
            .ok_or_else(|| ProvisionError::ProjectState("project has no build configurations".to_string()))?;
        Ok(required_string(self.object(first)?, "name")?.to_string())
    }
}

/// Target settings layered over project settings
struct BuildSettings<'a> {
    project: Option<&'a Dictionary>,
    target: Option<&'a Dictionary>,
    target_name: &'a str,
    source_root: &'a Path,
    project_name: &'a str,
}

impl BuildSettings<'_> {
    fn raw(&self, key: &str) -> Option<&str> {
        self.target
            .and_then(|settings| settings.get(key))
            .or_else(|| self.project.and_then(|settings| settings.get(key)))
            .and_then(Value::as_string)
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(value) = self.raw(key) {
            return Some(value.to_string());
        }
        match key {
            "TARGET_NAME" | "PRODUCT_NAME" => Some(self.target_name.to_string()),
            "SRCROOT" | "PROJECT_DIR" => Some(self.source_root.display().to_string()),
            "PROJECT_NAME" => Some(self.project_name.to_string()),
            _ => None,
        }
    }

    fn expanded(&self, key: &str) -> Result<Option<String>> {
        self.raw(key)
            .map(|value| expand_build_setting(value, &|name| self.lookup(name), 0))
            .transpose()
    }
}

/// Resolve `$(VAR)`, `${VAR}` and `$(VAR:modifier)` references.
fn expand_build_setting(
    value: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
    depth: usize,
) -> Result<String> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(ProvisionError::ProjectState(format!(
            "build setting references nest too deeply: {value}"
        )));
    }

    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find('$') {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let close = match after.chars().next() {
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                expanded.push('$');
                rest = after;
                continue;
            }
        };
        let end = after.find(close).ok_or_else(|| {
            ProvisionError::ProjectState(format!("unterminated build setting reference: {value}"))
        })?;
        let reference = &after[1..end];
        let (name, modifier) = match reference.split_once(':') {
            Some((name, modifier)) => (name, Some(modifier)),
            None => (reference, None),
        };

        let resolved = lookup(name).ok_or_else(|| {
            ProvisionError::ProjectState(format!("unresolved build setting $({name}) in '{value}'"))
        })?;
        let resolved = expand_build_setting(&resolved, lookup, depth + 1)?;
        expanded.push_str(&apply_modifier(&resolved, modifier));
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

fn apply_modifier(value: &str, modifier: Option<&str>) -> String {
    match modifier {
        Some("rfc1034identifier") => value
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
            .collect(),
        Some("c99extidentifier") => value
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect(),
        Some("lower") => value.to_lowercase(),
        Some("upper") => value.to_uppercase(),
        _ => value.to_string(),
    }
}

async fn read_entitlements(path: &Path) -> Result<Dictionary> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        ProvisionError::ProjectState(format!("failed to read entitlements {}: {e}", path.display()))
    })?;
    Value::from_reader(Cursor::new(bytes))?
        .into_dictionary()
        .ok_or_else(|| {
            ProvisionError::ProjectState(format!("entitlements are not a dictionary: {}", path.display()))
        })
}

fn required_string<'a>(dict: &'a Dictionary, key: &str) -> Result<&'a str> {
    dict.get(key)
        .and_then(Value::as_string)
        .ok_or_else(|| ProvisionError::ProjectState(format!("project object has no '{key}'")))
}

fn id_list<'a>(dict: &'a Dictionary, key: &str) -> Vec<&'a str> {
    dict.get(key)
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_string).collect())
        .unwrap_or_default()
}

fn child_dictionary_mut<'a>(dict: &'a mut Dictionary, key: &str) -> Result<&'a mut Dictionary> {
    if !dict.contains_key(key) {
        dict.insert(key.to_string(), Value::Dictionary(Dictionary::new()));
    }
    dict.get_mut(key)
        .and_then(Value::as_dictionary_mut)
        .ok_or_else(|| ProvisionError::ProjectState(format!("'{key}' is not a dictionary")))
}

fn set_string(dict: &mut Dictionary, key: &str, value: &str) {
    dict.insert(key.to_string(), Value::String(value.to_string()));
}
