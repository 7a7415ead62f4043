//! Loads a graph from a csv edge list.
//!
//! Each record gives the 2 node ids of an edge, other fields are ignored.
//! Lines beginning with # or % are comments. Node ids are arbitrary strings, a node
//! is indexed by the rank of first appearance of its id.
//! Graphs are undirected, self loops and repeated edges are dropped.
//!
//! Knowledge graphs are read the same way, each node being labelled with its id. Label embeddings are read
//! from records made of a label followed by the vector coordinates.

use anyhow::anyhow;

use std::fs::{File, OpenOptions};
use std::io::BufReader;
use std::path::Path;

use csv::ReaderBuilder;
use indexmap::IndexSet;
use petgraph::graph::NodeIndex;

use crate::dataset::ged::PlainGraph;
use crate::dataset::kg::{LabelEmbedding, LabeledGraph};

fn open_csv(filepath: &Path, delim: u8) -> anyhow::Result<csv::Reader<BufReader<File>>> {
    let fileres = OpenOptions::new().read(true).open(filepath);
    let file = match fileres {
        Ok(file) => file,
        Err(e) => {
            log::error!("could not open csv file {:?}", filepath.as_os_str());
            return Err(anyhow!("could not open csv file {} : {}", filepath.display(), e));
        }
    };
    let bufreader = BufReader::new(file);
    Ok(ReaderBuilder::new().delimiter(delim).flexible(true).has_headers(false).comment(Some(b'#')).from_reader(bufreader))
}

// non empty trimmed fields, None for a % comment or an empty record
fn record_fields(record: &csv::StringRecord) -> Option<Vec<&str>> {
    let fields: Vec<&str> = record.iter().map(|f| f.trim()).filter(|f| !f.is_empty()).collect();
    if fields.is_empty() || fields[0].starts_with('%') {
        None
    } else {
        Some(fields)
    }
}

/// returns the graph and the node ids, node of rank i having id at rank i in the IndexSet
pub fn graph_from_csv(filepath: &Path, delim: u8) -> anyhow::Result<(PlainGraph, IndexSet<String>)> {
    let mut rdr = open_csv(filepath, delim)?;
    //
    let mut node_ids = IndexSet::<String>::new();
    let mut edges = Vec::<(usize, usize)>::new();
    let mut nb_record = 0;
    for result in rdr.records() {
        let record = result?;
        nb_record += 1;
        let fields = match record_fields(&record) {
            Some(fields) => fields,
            None => continue,
        };
        if fields.len() < 2 {
            log::error!("graph_from_csv : record {} has {} fields, expected at least 2", nb_record, fields.len());
            return Err(anyhow!("record {} of {} has {} fields, expected at least 2", nb_record, filepath.display(), fields.len()));
        }
        let (a, _) = node_ids.insert_full(fields[0].to_string());
        let (b, _) = node_ids.insert_full(fields[1].to_string());
        edges.push((a, b));
    }
    //
    let mut graph = PlainGraph::with_capacity(node_ids.len(), edges.len());
    for _ in 0..node_ids.len() {
        graph.add_node(());
    }
    let mut nb_dropped = 0;
    for (a, b) in edges {
        if a == b || graph.contains_edge(NodeIndex::new(a), NodeIndex::new(b)) {
            nb_dropped += 1;
            continue;
        }
        graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), ());
    }
    log::info!(
        "graph_from_csv : {}, {} records, {} nodes, {} edges, {} self loops or repeated edges dropped",
        filepath.display(),
        nb_record,
        graph.node_count(),
        graph.edge_count(),
        nb_dropped
    );
    Ok((graph, node_ids))
} // end of graph_from_csv

/// an edge list as a graph whose nodes are labelled by their id
pub fn labeled_graph_from_csv(filepath: &Path, delim: u8) -> anyhow::Result<LabeledGraph> {
    let (graph, node_ids) = graph_from_csv(filepath, delim)?;
    let labeled = graph.map(|i, _| node_ids.get_index(i.index()).cloned().unwrap_or_default(), |_, _| ());
    Ok(labeled)
}

/// Reads records label, x_1, ..., x_d. All vectors must have the same dimension d > 0.
pub fn label_embedding_from_csv(filepath: &Path, delim: u8) -> anyhow::Result<LabelEmbedding> {
    let mut rdr = open_csv(filepath, delim)?;
    let mut embedding: Option<LabelEmbedding> = None;
    let mut nb_record = 0;
    for result in rdr.records() {
        let record = result?;
        nb_record += 1;
        let fields = match record_fields(&record) {
            Some(fields) => fields,
            None => continue,
        };
        if fields.len() < 2 {
            log::error!("label_embedding_from_csv : record {} has no vector", nb_record);
            return Err(anyhow!("record {} of {} has no vector", nb_record, filepath.display()));
        }
        let mut vector = Vec::<f64>::with_capacity(fields.len() - 1);
        for f in &fields[1..] {
            match f.parse::<f64>() {
                Ok(x) => vector.push(x),
                Err(e) => {
                    log::error!("label_embedding_from_csv : record {}, could not parse {} : {}", nb_record, f, e);
                    return Err(anyhow!("record {} of {}, could not parse {} : {}", nb_record, filepath.display(), f, e));
                }
            }
        }
        let embedding = embedding.get_or_insert_with(|| LabelEmbedding::new(vector.len()));
        embedding.insert(fields[0], vector)?;
    }
    match embedding {
        Some(embedding) => {
            log::info!("label_embedding_from_csv : {}, {} labels of dim {}", filepath.display(), embedding.get_nb_labels(), embedding.get_dim());
            Ok(embedding)
        }
        None => {
            log::error!("label_embedding_from_csv : no vector in {}", filepath.display());
            Err(anyhow!("no vector in {}", filepath.display()))
        }
    }
} // end of label_embedding_from_csv

#[cfg(test)]
mod tests {

    use super::*;
    use std::io::Write;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn load_undirected_edge_list() {
        log_init_test();
        //
        let path = std::env::temp_dir().join("graphmatch_csv_test.txt");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "# a comment").unwrap();
            writeln!(file, "% another one").unwrap();
            writeln!(file, "10 20").unwrap();
            writeln!(file, "20 30 1.5").unwrap();
            writeln!(file, "30 20").unwrap();
            writeln!(file, "30 30").unwrap();
            writeln!(file, "a 10").unwrap();
        }
        let (graph, ids) = graph_from_csv(&path, b' ').unwrap();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(ids.get_index_of("20"), Some(1));
        assert_eq!(ids.get_index_of("a"), Some(3));
        assert!(graph.contains_edge(NodeIndex::new(3), NodeIndex::new(0)));
        let _ = std::fs::remove_file(&path);
        //
        assert!(graph_from_csv(Path::new("/nonexistent/graph.csv"), b',').is_err());
    }

    #[test]
    fn load_labels_and_embedding() {
        log_init_test();
        //
        let graph_path = std::env::temp_dir().join("graphmatch_labeled_csv_test.txt");
        {
            let mut file = std::fs::File::create(&graph_path).unwrap();
            writeln!(file, "alice,bob").unwrap();
            writeln!(file, "bob,carol").unwrap();
        }
        let graph = labeled_graph_from_csv(&graph_path, b',').unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph[NodeIndex::new(2)], "carol");
        let _ = std::fs::remove_file(&graph_path);
        //
        let path = std::env::temp_dir().join("graphmatch_embedding_csv_test.txt");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "# label embedding").unwrap();
            writeln!(file, "alice\t1.0\t0.5").unwrap();
            writeln!(file, "bob\t-1\t2").unwrap();
            writeln!(file, "carol\t0\t0").unwrap();
        }
        let embedding = label_embedding_from_csv(&path, b'\t').unwrap();
        assert_eq!(embedding.get_dim(), 2);
        assert_eq!(embedding.get_nb_labels(), 3);
        assert_eq!(embedding.get_embedding("bob"), Some([-1f64, 2.].as_slice()));
        assert!(embedding.check_graph(&graph).is_ok());
        {
            let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "dave\t1").unwrap();
        }
        assert!(label_embedding_from_csv(&path, b'\t').is_err());
        let _ = std::fs::remove_file(&path);
    } // end of load_labels_and_embedding
} // end of mod tests
