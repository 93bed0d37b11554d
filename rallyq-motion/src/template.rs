use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::similarity::Category;
use rallyq_common::PoseFrame;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unable to access template store: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed template store: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed landmarks in template '{name}': {source}")]
    Data {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A recorded movement used as comparison target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub category: Category,
    pub frames: Vec<PoseFrame>,
}

/// One line of the store, landmarks are kept as a JSON array
#[derive(Debug, Serialize, Deserialize)]
struct TemplateRow {
    name: String,
    category: Category,
    data: String,
}

const HEADER: [&str; 3] = ["name", "category", "data"];

/// All templates, persisted as a delimited file rewritten on every change
#[derive(Debug, Clone)]
pub struct TemplateStore {
    path: PathBuf,
    templates: Vec<Template>,
}

impl TemplateStore {
    /// An empty store that will be written at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            templates: vec![],
        }
    }

    /// Load the whole store, a missing file is an empty store
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let mut store = Self::new(&path);
        if !store.path.exists() {
            tracing::info!("no template store, starting empty");
            return Ok(store);
        }

        let file = fs::File::open(&store.path)?;
        store.templates = read_templates(file)?;
        tracing::info!("loaded {} templates", store.templates.len());
        Ok(store)
    }

    /// Rewrite the whole store
    #[tracing::instrument(skip_all, fields(path = %self.path.display()))]
    pub fn save(&self) -> Result<(), StoreError> {
        let file = fs::File::create(&self.path)?;
        write_templates(file, &self.templates)?;
        tracing::debug!("saved {} templates", self.templates.len());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn by_category(&self, category: Category) -> impl Iterator<Item = &Template> {
        self.templates.iter().filter(move |t| t.category == category)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Add a template, replacing the one with the same name and category
    pub fn add(&mut self, template: Template) {
        if let Some(existing) = self
            .templates
            .iter_mut()
            .find(|t| t.name == template.name && t.category == template.category)
        {
            tracing::info!("replacing template {} ({})", template.name, template.category);
            *existing = template;
        } else {
            self.templates.push(template);
        }
    }

    /// Remove a template, returns false if it did not exist
    pub fn remove(&mut self, name: &str, category: Category) -> bool {
        let before = self.templates.len();
        self.templates
            .retain(|t| !(t.name == name && t.category == category));
        before != self.templates.len()
    }
}

pub(crate) fn write_templates<W: Write>(writer: W, templates: &[Template]) -> Result<(), StoreError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    writer.write_record(HEADER)?;
    for template in templates {
        let data = serde_json::to_string(&template.frames).map_err(|source| StoreError::Data {
            name: template.name.clone(),
            source,
        })?;
        writer.serialize(TemplateRow {
            name: template.name.clone(),
            category: template.category,
            data,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub(crate) fn read_templates<R: Read>(reader: R) -> Result<Vec<Template>, StoreError> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut templates = vec![];
    for row in reader.deserialize::<TemplateRow>() {
        let row = row?;
        let frames = serde_json::from_str(&row.data).map_err(|source| StoreError::Data {
            name: row.name.clone(),
            source,
        })?;
        templates.push(Template {
            name: row.name,
            category: row.category,
            frames,
        });
    }
    Ok(templates)
}
