use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::LabelError;
use crate::types::Label;


/// Index -> name table for the model's classes, loaded once at startup.
#[derive(Clone, Debug)]
pub struct ClassNames {
    names: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NamesField {
    List(Vec<String>),
    Map(BTreeMap<usize, String>),
}

#[derive(Deserialize)]
struct DatasetFile {
    names: NamesField,
}

impl ClassNames {
    pub fn new(names: Vec<String>) -> Result<Self, LabelError> {
        if names.is_empty() {
            return Err(LabelError::ClassTable("no class names".to_string()));
        }
        Ok(Self { names })
    }

    /// Reads the `names` key of a dataset yaml, in list or `{index: name}` form.
    pub fn from_yaml_str(content: &str) -> Result<Self, LabelError> {
        let dataset: DatasetFile = serde_yaml::from_str(content)?;
        let names = match dataset.names {
            NamesField::List(names) => names,
            NamesField::Map(map) => {
                // BTreeMap iterates in key order, so the keys must be exactly 0..n
                for (expected, index) in map.keys().enumerate() {
                    if *index != expected {
                        return Err(LabelError::ClassTable(format!(
                            "class index {} is missing",
                            expected
                        )));
                    }
                }
                map.into_values().collect()
            }
        };
        Self::new(names)
    }

    pub async fn load(path: &Path) -> Result<Self, LabelError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&content)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}


fn parse_coordinate(line: usize, field: &'static str, raw: &str) -> Result<f64, LabelError> {
    let value: f64 = raw.parse().map_err(|_| LabelError::InvalidNumber {
        line,
        field,
        value: raw.to_string(),
    })?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(LabelError::OutOfRange { line, field, value });
    }
    Ok(value)
}

fn parse_line(line: usize, text: &str, classes: &ClassNames) -> Result<Label, LabelError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != 5 && fields.len() != 6 {
        return Err(LabelError::FieldCount {
            line,
            found: fields.len(),
        });
    }

    let index: usize = fields[0].parse().map_err(|_| LabelError::InvalidNumber {
        line,
        field: "class index",
        value: fields[0].to_string(),
    })?;
    let class_name = classes.get(index).ok_or(LabelError::UnknownClass {
        line,
        index,
        len: classes.len(),
    })?;

    let cx = parse_coordinate(line, "cx", fields[1])?;
    let cy = parse_coordinate(line, "cy", fields[2])?;
    let width = parse_coordinate(line, "width", fields[3])?;
    let height = parse_coordinate(line, "height", fields[4])?;

    // optional confidence column, checked but not kept
    if let Some(raw) = fields.get(5) {
        raw.parse::<f64>().map_err(|_| LabelError::InvalidNumber {
            line,
            field: "confidence",
            value: raw.to_string(),
        })?;
    }

    Ok(Label {
        class_name: class_name.to_string(),
        cx,
        cy,
        width,
        height,
    })
}

/// Parses a YOLO label file. One bad line rejects the whole file.
pub fn parse_labels(content: &str, classes: &ClassNames) -> Result<Vec<Label>, LabelError> {
    content
        .lines()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(idx, text)| parse_line(idx + 1, text, classes))
        .collect()
}
