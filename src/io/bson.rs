//! bson dump and reload of models and graph vectors.
//!
//! A file is a sequence of bson documents (a document must be smaller than 16Mb).
//!
//! Model dump :
//! 1. a document with key "header" : format version, type name of parameters ("f32" or "f64"),
//!    raw node and edge feature dimensions, number of propagation layers holding parameters,
//!    number of parameters and number of parameter documents.
//! 2. a document with key "config" : the [ModelConfig] serialized with serde.
//! 3. variables in name order, each one as documents with key "var" holding its name, its shape and
//!    at most PARAMS_CHUNK of its row major values. A large variable spans consecutive documents.
//!
//! Graph vectors dump :
//! 1. a document with key "header" : version, type name, dimension, number of vectors
//! 2. one document per vector, with key its rank.
//!
//! As bson has no unsigned type all sizes are encoded as i64.

use anyhow::anyhow;

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bson::{bson, Bson, Document};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use indexmap::IndexMap;
use ndarray::{Array1, Array2};

use crate::model::config::ModelConfig;
use crate::model::net::GraphNet;
use crate::nn::real::Real;

const BSON_FORMAT_VERSION: i64 = 2;

/// max number of parameters in one document
const PARAMS_CHUNK: usize = 100_000;

/// header of a model dump
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelBsonHeader {
    pub version: i64,
    /// std::any::type_name of parameters
    pub type_name: String,
    pub node_feature_dim: i64,
    pub edge_feature_dim: i64,
    /// can differ from config n_prop_layers if parameters are not shared
    pub nb_built_prop_layers: i64,
    pub nb_params: i64,
    /// number of "var" documents
    pub nb_var_documents: i64,
} // end of ModelBsonHeader

/// a chunk of the values of a variable
#[derive(Debug, Serialize, Deserialize)]
struct VarChunk<F> {
    name: String,
    shape: Vec<i64>,
    values: Vec<F>,
}

/// header of a graph vectors dump
#[derive(Debug, Serialize, Deserialize)]
pub struct VectorsBsonHeader {
    pub version: i64,
    pub type_name: String,
    /// length of vectors
    pub dimension: i64,
    /// number of vectors
    pub nbdata: i64,
} // end of VectorsBsonHeader

fn to_i64(n: usize) -> anyhow::Result<i64> {
    i64::try_from(n).map_err(|e| anyhow!("cannot encode {} as i64 : {}", n, e))
}

fn to_usize(n: i64) -> anyhow::Result<usize> {
    usize::try_from(n).map_err(|e| anyhow!("cannot decode {} as usize : {}", n, e))
}

fn create_writer(path: &Path) -> anyhow::Result<BufWriter<File>> {
    match OpenOptions::new().write(true).create(true).truncate(true).open(path) {
        Ok(file) => Ok(BufWriter::new(file)),
        Err(e) => {
            log::error!("could not open file {} for writing : {}", path.display(), e);
            Err(anyhow!("could not open file {} : {}", path.display(), e))
        }
    }
}

fn open_reader(path: &Path) -> anyhow::Result<BufReader<File>> {
    match OpenOptions::new().read(true).open(path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(e) => {
            log::error!("could not open file {} : {}", path.display(), e);
            Err(anyhow!("could not open file {} : {}", path.display(), e))
        }
    }
}

fn write_document(doc: &Document, writer: &mut BufWriter<File>, path: &Path) -> anyhow::Result<()> {
    if let Err(e) = doc.to_writer(writer) {
        log::error!("bson dump in {} failed : {}", path.display(), e);
        return Err(anyhow!("bson dump in {} failed : {}", path.display(), e));
    }
    Ok(())
}

// reads next document and returns the value at key
fn read_value(reader: &mut BufReader<File>, key: &str, path: &Path) -> anyhow::Result<Bson> {
    let doc = match Document::from_reader(reader) {
        Ok(doc) => doc,
        Err(e) => {
            log::error!("could not load document with key {} from file {} : {}", key, path.display(), e);
            return Err(anyhow!("could not load document with key {} from file {} : {}", key, path.display(), e));
        }
    };
    match doc.get(key) {
        Some(value) => Ok(value.clone()),
        None => {
            log::error!("could not find key {} in file {}", key, path.display());
            Err(anyhow!("could not find key {} in file {}", key, path.display()))
        }
    }
}

fn decode<T: DeserializeOwned>(value: Bson, key: &str) -> anyhow::Result<T> {
    bson::from_bson(value).map_err(|e| {
        log::error!("bson decoding error for key {} : {}", key, e);
        anyhow!("bson decoding error for key {} : {}", key, e)
    })
}

fn check_type_name<F>(type_name: &str) -> anyhow::Result<()> {
    if type_name != std::any::type_name::<F>() {
        log::error!("dump has type name {}, reloading with {}", type_name, std::any::type_name::<F>());
        return Err(anyhow!("type error, dump has type {}, reloading with {}", type_name, std::any::type_name::<F>()));
    }
    Ok(())
}

fn check_version(version: i64) -> anyhow::Result<()> {
    if version != BSON_FORMAT_VERSION {
        log::error!("header format version : {}", version);
        return Err(anyhow!("format version {} not supported", version));
    }
    Ok(())
}

/// dumps model configuration and parameters in file path
pub fn dump_model<F: Real + Serialize>(model: &GraphNet<F>, path: &Path) -> anyhow::Result<()> {
    log::info!("dumping model in {}", path.display());
    let mut writer = create_writer(path)?;
    let mut chunks = Vec::<VarChunk<F>>::new();
    for (name, var) in model.get_store().get_named_vars()? {
        let shape = var.dims().iter().map(|d| to_i64(*d)).collect::<anyhow::Result<Vec<i64>>>()?;
        let values = var.as_tensor().flatten_all()?.to_vec1::<F>()?;
        if values.is_empty() {
            chunks.push(VarChunk { name, shape, values });
            continue;
        }
        for chunk in values.chunks(PARAMS_CHUNK) {
            chunks.push(VarChunk { name: name.clone(), shape: shape.clone(), values: chunk.to_vec() });
        }
    }
    //
    let node_feature_dim = to_i64(model.get_node_feature_dim())?;
    let edge_feature_dim = to_i64(model.get_edge_feature_dim())?;
    let nb_built_prop_layers = to_i64(model.get_nb_built_prop_layers())?;
    let nb_params = to_i64(model.nb_params())?;
    let nb_var_documents = to_i64(chunks.len())?;
    let mut doc = Document::new();
    doc.insert(
        "header",
        bson!({
            "version": BSON_FORMAT_VERSION,
            "type_name": std::any::type_name::<F>(),
            "node_feature_dim": node_feature_dim,
            "edge_feature_dim": edge_feature_dim,
            "nb_built_prop_layers": nb_built_prop_layers,
            "nb_params": nb_params,
            "nb_var_documents": nb_var_documents,
        }),
    );
    write_document(&doc, &mut writer, path)?;
    //
    let mut doc = Document::new();
    doc.insert("config", bson::to_bson(model.get_config())?);
    write_document(&doc, &mut writer, path)?;
    //
    for chunk in &chunks {
        let mut doc = Document::new();
        doc.insert("var", bson::to_bson(chunk)?);
        write_document(&doc, &mut writer, path)?;
    }
    writer.flush()?;
    log::info!("model dump in {} done, {} parameters in {} documents", path.display(), model.nb_params(), chunks.len());
    Ok(())
} // end of dump_model

/// reads the header of a model dump, useful to get the parameter type before reloading
pub fn get_model_header(path: &Path) -> anyhow::Result<ModelBsonHeader> {
    let mut reader = open_reader(path)?;
    decode(read_value(&mut reader, "header", path)?, "header")
}

/// reloads a model dumped by [dump_model]
pub fn reload_model<F: Real + DeserializeOwned>(path: &Path) -> anyhow::Result<GraphNet<F>> {
    log::info!("reloading model from {}", path.display());
    let mut reader = open_reader(path)?;
    let header: ModelBsonHeader = decode(read_value(&mut reader, "header", path)?, "header")?;
    log::debug!("header : {:?}", header);
    check_version(header.version)?;
    check_type_name::<F>(&header.type_name)?;
    let config: ModelConfig = decode(read_value(&mut reader, "config", path)?, "config")?;
    // values of each variable, chunks of a variable follow each other
    let mut variables = IndexMap::<String, (Vec<usize>, Vec<F>)>::new();
    for _ in 0..to_usize(header.nb_var_documents)? {
        let chunk: VarChunk<F> = decode(read_value(&mut reader, "var", path)?, "var")?;
        let shape = chunk.shape.iter().map(|d| to_usize(*d)).collect::<anyhow::Result<Vec<usize>>>()?;
        let entry = variables.entry(chunk.name).or_insert_with(|| (shape, Vec::new()));
        entry.1.extend(chunk.values);
    }
    // as many layers as dumped, the number of rounds comes from config
    let nb_built = to_usize(header.nb_built_prop_layers)?;
    let model = GraphNet::<F>::with_nb_built_layers(&config, to_usize(header.node_feature_dim)?, to_usize(header.edge_feature_dim)?, 0, nb_built)?;
    if variables.len() != model.get_store().get_nb_vars() {
        log::error!("dump has {} variables, model has {}", variables.len(), model.get_store().get_nb_vars());
        return Err(anyhow!("dump has {} variables, model has {}", variables.len(), model.get_store().get_nb_vars()));
    }
    for (name, (shape, values)) in variables {
        model.get_store().set_var_values(&name, &shape, values)?;
    }
    if model.nb_params() != to_usize(header.nb_params)? {
        log::error!("reloaded {} parameters, header announces {}", model.nb_params(), header.nb_params);
        return Err(anyhow!("reloaded {} parameters, header announces {}", model.nb_params(), header.nb_params));
    }
    log::info!("model reloaded, {} parameters", model.nb_params());
    Ok(model)
} // end of reload_model

/// dumps graph vectors, one per row
pub fn dump_graph_vectors<F: Real + Serialize>(vectors: &Array2<F>, path: &Path) -> anyhow::Result<()> {
    log::info!("dumping {} graph vectors in {}", vectors.nrows(), path.display());
    let mut writer = create_writer(path)?;
    let dimension = to_i64(vectors.ncols())?;
    let nbdata = to_i64(vectors.nrows())?;
    let mut doc = Document::new();
    doc.insert(
        "header",
        bson!({
            "version": BSON_FORMAT_VERSION,
            "type_name": std::any::type_name::<F>(),
            "dimension": dimension,
            "nbdata": nbdata,
        }),
    );
    write_document(&doc, &mut writer, path)?;
    for (i, row) in vectors.rows().into_iter().enumerate() {
        let data = row.iter().map(bson::to_bson).collect::<Result<Vec<Bson>, _>>()?;
        let mut doc = Document::new();
        doc.insert(i.to_string(), data);
        write_document(&doc, &mut writer, path)?;
    }
    writer.flush()?;
    Ok(())
} // end of dump_graph_vectors

/// reloads graph vectors dumped by [dump_graph_vectors]
pub fn reload_graph_vectors<F: Real + DeserializeOwned>(path: &Path) -> anyhow::Result<Array2<F>> {
    let mut reader = open_reader(path)?;
    let header: VectorsBsonHeader = decode(read_value(&mut reader, "header", path)?, "header")?;
    check_version(header.version)?;
    check_type_name::<F>(&header.type_name)?;
    let dim = to_usize(header.dimension)?;
    let nbdata = to_usize(header.nbdata)?;
    let mut vectors = Array2::<F>::zeros((0, dim));
    for i in 0..nbdata {
        let key = i.to_string();
        let data: Vec<F> = decode(read_value(&mut reader, &key, path)?, &key)?;
        if let Err(e) = vectors.push_row(Array1::from(data).view()) {
            log::error!("could not insert vector {} : {}", i, e);
            return Err(anyhow!("could not insert vector {} : {}", i, e));
        }
    }
    log::info!("reloaded {} graph vectors of dim {}", nbdata, dim);
    Ok(vectors)
} // end of reload_graph_vectors

#[cfg(test)]
mod tests {

    use super::*;
    use crate::dataset::ged::GraphEditDistanceDataset;
    use crate::dataset::GraphSimilarityDataset;
    use crate::model::config::{DatasetConfig, ModelType};

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn small_config() -> ModelConfig {
        let mut config = ModelConfig::default();
        config.model_type = ModelType::Matching;
        config.encoder.node_hidden_sizes = Some(vec![8]);
        config.encoder.edge_hidden_sizes = Some(vec![4]);
        config.propagation.node_state_dim = 8;
        config.propagation.edge_hidden_sizes = vec![16];
        config.propagation.node_hidden_sizes = vec![16];
        config.propagation.n_prop_layers = 3;
        config.propagation.share_prop_params = false;
        config.aggregator.node_hidden_sizes = vec![6];
        config.aggregator.graph_transform_sizes = Some(vec![6]);
        config
    }

    #[test]
    fn model_dump_reload() {
        log_init_test();
        //
        let mut model = GraphNet::<f32>::new(&small_config(), 2, 2, 19).unwrap();
        model.reset_n_prop_layers(2).unwrap();
        let path = std::env::temp_dir().join("graphmatch_model_dump_test.bson");
        dump_model(&model, &path).unwrap();
        //
        let header = get_model_header(&path).unwrap();
        assert_eq!(header.type_name, "f32");
        assert_eq!(header.nb_built_prop_layers, 3);
        assert!(reload_model::<f64>(&path).is_err());
        let reloaded = reload_model::<f32>(&path).unwrap();
        assert_eq!(reloaded.get_config(), model.get_config());
        assert_eq!(reloaded.get_nb_prop_layers(), 2);
        assert_eq!(reloaded.flat_params().unwrap(), model.flat_params().unwrap());
        assert_eq!(reloaded.get_nb_built_prop_layers(), 3);
        // same graph vectors
        let mut dataset = GraphEditDistanceDataset::new(&DatasetConfig::default(), true, 3).unwrap();
        let (graphs, _) = dataset.pair_batch::<f32>(2).unwrap();
        assert_eq!(model.forward(&graphs).unwrap(), reloaded.forward(&graphs).unwrap());
        let _ = std::fs::remove_file(&path);
    } // end of model_dump_reload

    #[test]
    fn vectors_dump_reload() {
        log_init_test();
        //
        let vectors = ndarray::arr2(&[[1f64, -2.5, 0.], [3.25, 4., 1.0E-10]]);
        let path = std::env::temp_dir().join("graphmatch_vectors_dump_test.bson");
        dump_graph_vectors::<f64>(&vectors, &path).unwrap();
        let reloaded = reload_graph_vectors::<f64>(&path).unwrap();
        assert_eq!(reloaded, vectors);
        assert!(reload_graph_vectors::<f32>(&path).is_err());
        assert!(reload_model::<f64>(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
} // end of mod tests
