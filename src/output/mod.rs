use crate::models::Incident;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// Output handler for emitted incidents
pub struct OutputHandler {
    format: OutputFormat,
    writer: Option<Box<dyn Write + Send>>,
}

#[derive(Debug, Clone)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "jsonl" => OutputFormat::Jsonl,
            "console" => OutputFormat::Console,
            _ => OutputFormat::Jsonl, // Default
        }
    }
}

impl OutputHandler {
    /// Create a new output handler
    pub fn new(
        format: OutputFormat,
        file_path: Option<PathBuf>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let writer: Option<Box<dyn Write + Send>> = match (&format, file_path) {
            (OutputFormat::Console, _) => None,
            (_, Some(path)) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Box::new(BufWriter::new(file)))
            }
            (_, None) => None,
        };

        Ok(OutputHandler { format, writer })
    }

    /// Write one incident
    pub fn write_incident(&mut self, incident: &Incident) -> Result<(), Box<dyn std::error::Error>> {
        match &self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(incident)?;
                self.write_output(&format!("{}\n", json))?;
            }
            OutputFormat::Jsonl => {
                let json = serde_json::to_string(incident)?;
                self.write_output(&format!("{}\n", json))?;
            }
            OutputFormat::Console => {
                let output = format!(
                    "[{}] {} - Key: {}, Score: {:.1}, Status: {}, Events: {}\n",
                    incident.category,
                    incident.summary,
                    incident.key,
                    incident.score,
                    incident.status,
                    incident.event_ids.len()
                );
                self.write_output(&output)?;
            }
        }
        Ok(())
    }

    fn write_output(&mut self, data: &str) -> Result<(), Box<dyn std::error::Error>> {
        match &mut self.writer {
            Some(writer) => {
                writer.write_all(data.as_bytes())?;
                writer.flush()?;
            }
            None => {
                print!("{}", data);
                use std::io::{self, Write};
                io::stdout().flush()?;
            }
        }
        Ok(())
    }

    /// Flush any buffered output
    pub fn flush(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Incident, IncidentCategory};

    fn sample_incident() -> Incident {
        Incident::new(
            IncidentCategory::CrossCloudRecon,
            "identity:mallory",
            62.5,
            "probe burst across providers".to_string(),
            vec!["e1".to_string(), "e2".to_string()],
            1700000000,
        )
    }

    #[test]
    fn test_jsonl_appends_one_line_per_incident() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();

        let mut handler = OutputHandler::new(OutputFormat::Jsonl, Some(path.clone())).unwrap();
        handler.write_incident(&sample_incident()).unwrap();
        handler.write_incident(&sample_incident()).unwrap();
        handler.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Incident = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.key, "identity:mallory");
    }

    #[test]
    fn test_format_parsing_defaults_to_jsonl() {
        assert!(matches!(OutputFormat::from_str("console"), OutputFormat::Console));
        assert!(matches!(OutputFormat::from_str("whatever"), OutputFormat::Jsonl));
    }
}
