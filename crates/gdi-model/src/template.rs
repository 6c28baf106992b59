//! Report, print and info templates.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: ResourceId,
    pub name: String,
    pub description: Option<String>,
    pub kind: TemplateKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateKind {
    /// `template_jasper`
    Report(ReportTemplate),
    /// `template_qgis`
    Project(ProjectTemplate),
    /// `template_info`
    Info(InfoTemplate),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub report_filename: Option<String>,
    pub default_format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTemplate {
    /// QGIS print layout XML
    pub print_layout: Option<String>,
    pub map_width: Option<i32>,
    pub map_height: Option<i32>,
    /// Comma separated label names
    pub print_labels: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoTemplate {
    pub info_type: InfoType,
    pub template: Option<String>,
    pub sql: Option<String>,
    pub module: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfoType {
    Wms,
    Sql,
    Module,
}

impl InfoType {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "wms" => Some(InfoType::Wms),
            "sql" => Some(InfoType::Sql),
            "module" => Some(InfoType::Module),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InfoType::Wms => "wms",
            InfoType::Sql => "sql",
            InfoType::Module => "module",
        }
    }
}

impl Template {
    pub fn as_report(&self) -> Option<&ReportTemplate> {
        match &self.kind {
            TemplateKind::Report(report) => Some(report),
            _ => None,
        }
    }

    pub fn as_project(&self) -> Option<&ProjectTemplate> {
        match &self.kind {
            TemplateKind::Project(project) => Some(project),
            _ => None,
        }
    }

    pub fn as_info(&self) -> Option<&InfoTemplate> {
        match &self.kind {
            TemplateKind::Info(info) => Some(info),
            _ => None,
        }
    }
}

impl ReportTemplate {
    /// Report file name without its `.jrxml` style extension.
    pub fn report_stem(&self) -> Option<&str> {
        self.report_filename.as_deref().map(|name| match name.rfind('.') {
            Some(pos) if pos > 0 => &name[..pos],
            _ => name,
        })
    }
}

impl ProjectTemplate {
    pub fn labels(&self) -> Vec<String> {
        match self.print_labels.as_deref() {
            Some(labels) if !labels.is_empty() => labels.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_stem_strips_extension() {
        let report = ReportTemplate {
            report_filename: Some("plan.v2.jrxml".into()),
            default_format: None,
        };
        assert_eq!(report.report_stem(), Some("plan.v2"));

        let report = ReportTemplate {
            report_filename: Some(".hidden".into()),
            default_format: None,
        };
        assert_eq!(report.report_stem(), Some(".hidden"));
    }

    #[test]
    fn print_labels_split_on_comma() {
        let project = ProjectTemplate {
            print_labels: Some("Titel,Kommentar".into()),
            ..Default::default()
        };
        assert_eq!(project.labels(), vec!["Titel", "Kommentar"]);
        assert!(ProjectTemplate::default().labels().is_empty());
    }
}
