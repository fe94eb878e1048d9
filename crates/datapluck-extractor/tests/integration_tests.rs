//! End-to-end extraction runs against the in-memory reader

use datapluck_convert::ConverterRegistry;
use datapluck_core::{Model, RefValue, Value};
use datapluck_extractor::{ExtractError, Extractor};
use datapluck_reader::{DbColumn, MockReader, Reader, ReaderError, Row};
use datapluck_writer::{Writer, WriterError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Event {
    Header,
    Batch { table: String, rows: Vec<Row> },
    Footer,
}

/// Test writer recording the exact call sequence it receives
#[derive(Clone, Default)]
struct CaptureWriter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CaptureWriter {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn batches(&self) -> Vec<(String, Vec<Row>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Batch { table, rows } => Some((table, rows)),
                _ => None,
            })
            .collect()
    }
}

impl Writer for CaptureWriter {
    fn write_header(&mut self) -> Result<(), WriterError> {
        self.events.lock().unwrap().push(Event::Header);
        Ok(())
    }

    fn write(&mut self, table: &str, rows: &[Row]) -> Result<(), WriterError> {
        self.events.lock().unwrap().push(Event::Batch {
            table: table.to_string(),
            rows: rows.to_vec(),
        });
        Ok(())
    }

    fn write_footer(&mut self) -> Result<(), WriterError> {
        self.events.lock().unwrap().push(Event::Footer);
        Ok(())
    }
}

/// Writer whose header always fails
struct BrokenWriter;

impl Writer for BrokenWriter {
    fn write_header(&mut self) -> Result<(), WriterError> {
        Err(WriterError::Io(std::io::Error::other("disk full")))
    }

    fn write(&mut self, _table: &str, _rows: &[Row]) -> Result<(), WriterError> {
        Ok(())
    }

    fn write_footer(&mut self) -> Result<(), WriterError> {
        Ok(())
    }
}

async fn seeded_store() -> MockReader {
    let reader = MockReader::new();

    reader
        .add_table(
            "customers",
            vec![
                DbColumn::new("id", "bigint").not_null(),
                DbColumn::new("name", "text"),
            ],
            vec![
                vec![Value::Int(34), Value::Text("Ada".into())],
                vec![Value::Int(35), Value::Text("Grace".into())],
            ],
        )
        .await;

    reader
        .add_table(
            "orders",
            vec![
                DbColumn::new("id", "bigint").not_null(),
                DbColumn::new("customer_id", "bigint"),
            ],
            vec![
                vec![Value::Int(100), Value::Int(34)],
                vec![Value::Int(101), Value::Int(34)],
                vec![Value::Int(102), Value::Int(99)],
            ],
        )
        .await;

    reader
}

fn model(yaml: &str, registry: &ConverterRegistry) -> Model {
    Model::from_yaml(yaml, registry).unwrap()
}

async fn run(
    reader: MockReader,
    model: &mut Model,
    writers: Vec<Box<dyn Writer + Send>>,
) -> Result<(), ExtractError> {
    let registry = ConverterRegistry::with_defaults();
    let reader: Arc<dyn Reader> = Arc::new(reader);
    let extractor = Extractor::new(reader, &registry, model).unwrap();
    extractor.run(model, writers).await
}

#[tokio::test]
async fn end_to_end_reference_resolution() {
    let yaml = r#"
tables:
  - name: customers
    filters:
      - name: id
        value: "34"
  - name: orders
    filters:
      - name: customer_id
        value: ${customers.id}
"#;

    let registry = ConverterRegistry::with_defaults();
    let mut m = model(yaml, &registry);
    let capture = CaptureWriter::default();

    run(seeded_store().await, &mut m, vec![Box::new(capture.clone())])
        .await
        .unwrap();

    // the customers value was propagated before orders was fetched
    assert_eq!(m.refs["customers.id"], RefValue::Scalar(Value::Int(34)));

    let events = capture.events();
    assert!(matches!(events.first(), Some(Event::Header)));
    assert!(matches!(events.last(), Some(Event::Footer)));

    let batches = capture.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].0, "customers");
    assert_eq!(batches[0].1.len(), 1);
    assert_eq!(batches[1].0, "orders");

    let order_ids: Vec<&Value> = batches[1].1.iter().map(|row| &row[0].1).collect();
    assert_eq!(order_ids, vec![&Value::Int(100), &Value::Int(101)]);
}

#[tokio::test]
async fn multivalued_reference_fans_out_and_forwards_one_batch() {
    let yaml = r#"
tables:
  - name: customers
  - name: orders
    filters:
      - name: customer_id
        value: ${customers.id[@]}
"#;

    let reader = MockReader::new();
    reader
        .add_table(
            "customers",
            vec![DbColumn::new("id", "bigint")],
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]],
        )
        .await;
    reader
        .add_table(
            "orders",
            vec![
                DbColumn::new("id", "bigint"),
                DbColumn::new("customer_id", "bigint"),
            ],
            vec![
                vec![Value::Int(100), Value::Int(1)],
                vec![Value::Int(101), Value::Int(2)],
                vec![Value::Int(102), Value::Int(3)],
                vec![Value::Int(103), Value::Int(4)],
            ],
        )
        .await;

    let registry = ConverterRegistry::with_defaults();
    let mut m = model(yaml, &registry);
    let capture = CaptureWriter::default();

    run(reader, &mut m, vec![Box::new(capture.clone())])
        .await
        .unwrap();

    // every referenced value was accumulated, in row order
    assert_eq!(
        m.refs["customers.id[@]"],
        RefValue::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );

    // the union of the three per-value fetches arrives as one batch
    let orders: Vec<(String, Vec<Row>)> = capture
        .batches()
        .into_iter()
        .filter(|(t, _)| t == "orders")
        .collect();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].1.len(), 3);
}

#[tokio::test]
async fn unresolved_reference_aborts_without_writing_the_table() {
    let yaml = r#"
tables:
  - name: customers
    filters:
      - name: id
        value: "999"
  - name: orders
    filters:
      - name: customer_id
        value: ${customers.id}
"#;

    let registry = ConverterRegistry::with_defaults();
    let mut m = model(yaml, &registry);
    let capture = CaptureWriter::default();

    let err = run(seeded_store().await, &mut m, vec![Box::new(capture.clone())])
        .await
        .unwrap_err();

    match err {
        ExtractError::UnresolvedReference { table, filter, expr } => {
            assert_eq!(table, "orders");
            assert_eq!(filter, "customer_id");
            assert_eq!(expr, "${customers.id}");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(capture.batches().iter().all(|(t, _)| t != "orders"));
}

#[tokio::test]
async fn reader_failure_aborts_the_level_and_later_levels() {
    let yaml = r#"
tables:
  - name: customers
  - name: products
  - name: orders
    filters:
      - name: customer_id
        value: ${customers.id}
"#;

    let reader = seeded_store().await;
    reader
        .add_table("products", vec![DbColumn::new("id", "bigint")], vec![])
        .await;
    reader
        .fail_data("products", ReaderError::Query("connection reset".into()))
        .await;

    let registry = ConverterRegistry::with_defaults();
    let mut m = model(yaml, &registry);
    let capture = CaptureWriter::default();

    let err = run(reader, &mut m, vec![Box::new(capture.clone())])
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::Reader(ReaderError::Query(_))));

    // the failed level forwarded nothing and orders never ran
    assert!(capture.batches().is_empty());
}

#[tokio::test]
async fn every_writer_receives_every_batch() {
    let yaml = r#"
tables:
  - name: customers
"#;

    let registry = ConverterRegistry::with_defaults();
    let mut m = model(yaml, &registry);
    let first = CaptureWriter::default();
    let second = CaptureWriter::default();

    run(
        seeded_store().await,
        &mut m,
        vec![Box::new(first.clone()), Box::new(second.clone())],
    )
    .await
    .unwrap();

    assert_eq!(first.batches().len(), 1);
    assert_eq!(second.batches().len(), 1);
    assert!(matches!(second.events().last(), Some(Event::Footer)));
}

#[tokio::test]
async fn writer_failure_is_returned_not_fatal() {
    let yaml = r#"
tables:
  - name: customers
"#;

    let registry = ConverterRegistry::with_defaults();
    let mut m = model(yaml, &registry);

    let err = run(seeded_store().await, &mut m, vec![Box::new(BrokenWriter)])
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::Writer(WriterError::Io(_))));
}

#[tokio::test]
async fn unknown_converter_fails_at_construction() {
    let registry = ConverterRegistry::with_defaults();
    let yaml = r#"
tables:
  - name: customers
"#;
    let mut m = model(yaml, &registry);
    m.converters.push("ghost".to_string());

    let reader: Arc<dyn Reader> = Arc::new(MockReader::new());
    let err = match Extractor::new(reader, &registry, &m) {
        Ok(_) => panic!("expected Extractor::new to reject unknown converter"),
        Err(e) => e,
    };

    assert!(matches!(err, ExtractError::UnknownConverter(id) if id == "ghost"));
}

#[tokio::test]
async fn repeated_runs_produce_the_same_row_sets() {
    let yaml = r#"
tables:
  - name: customers
    filters:
      - name: id
        value: "34"
  - name: orders
    filters:
      - name: customer_id
        value: ${customers.id}
"#;

    let registry = ConverterRegistry::with_defaults();
    let mut row_sets: Vec<BTreeMap<String, Vec<String>>> = Vec::new();

    for _ in 0..2 {
        let mut m = model(yaml, &registry);
        let capture = CaptureWriter::default();

        run(seeded_store().await, &mut m, vec![Box::new(capture.clone())])
            .await
            .unwrap();

        let mut per_table: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (table, rows) in capture.batches() {
            let entry = per_table.entry(table).or_default();
            entry.extend(rows.iter().map(|row| format!("{row:?}")));
            entry.sort();
        }
        row_sets.push(per_table);
    }

    assert_eq!(row_sets[0], row_sets[1]);
}
