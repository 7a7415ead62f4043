//! an executable to train graph similarity models and to embed graphs
//! example usage:
//! gmatch train --model matching --mode pair --loss margin --steps 5000 --dump gmn.bson
//! gmatch train --model embedding --update gru --prop 5 --lr 1e-3 --batch 20
//! gmatch embed --model gmn.bson --csv g1.txt --csv g2.txt --out vectors.bson
//! gmatch kgtrain --labels labels.tsv --graph kg1.csv --graph kg2.csv --test t1.csv --test t2.csv --steps 2000 --neg 3
//!
//! train uses the synthetic graph edit distance dataset, a fixed validation set is generated from seed 1234.
//! kgtrain draws pairs from the given knowledge graphs, node features being the vectors of node labels (node ids)
//! read from the labels file. After training the test graphs are compared 2 by 2 and their similarities logged.
//! For a matching model graphs given to embed are matched 2 by 2 (first with second, third with fourth ...).
//! Parameters are f32.

use anyhow::anyhow;
use clap::{Arg, ArgMatches, Command};

use std::path::Path;
use std::str::FromStr;

use std::sync::Arc;

use ndarray::Axis;

use graphmatch::dataset::kg::KG_EDGE_FEATURE_DIM;
use graphmatch::nn::tensor::{scalar_value, tensor_to_array2};
use graphmatch::prelude::*;

static DEFAULT_VECTORS_OUTPUT: &str = "graph_vectors.bson";

// parse optional value of arg name
fn parse_opt<T>(matches: &ArgMatches, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match matches.value_of(name) {
        Some(str) => match str.parse::<T>() {
            Ok(val) => Ok(Some(val)),
            Err(e) => {
                log::error!("could not parse argument {} : {}", name, e);
                Err(anyhow!("could not parse argument {} : {}", name, e))
            }
        },
        None => Ok(None),
    }
} // end of parse_opt

fn parse_train_args(matches: &ArgMatches) -> anyhow::Result<(Config, Option<String>)> {
    log::debug!("in parse_train_args");
    let mut config = Config::default();
    if let Some(model_type) = parse_opt::<ModelType>(matches, "model")? {
        config.model.model_type = model_type;
    }
    if let Some(update) = parse_opt::<NodeUpdateType>(matches, "update")? {
        config.model.propagation.node_update_type = update;
    }
    if let Some(aggregation) = parse_opt::<AggregationType>(matches, "aggregation")? {
        config.model.aggregator.aggregation_type = aggregation;
    }
    if let Some(similarity) = parse_opt::<Similarity>(matches, "similarity")? {
        config.model.propagation.similarity = similarity;
    }
    if let Some(n_prop_layers) = parse_opt::<usize>(matches, "prop")? {
        config.model.propagation.n_prop_layers = n_prop_layers;
    }
    if let Some(mode) = parse_opt::<TrainingMode>(matches, "mode")? {
        config.training.mode = mode;
    }
    if let Some(loss) = parse_opt::<LossType>(matches, "loss")? {
        config.training.loss = loss;
    }
    if let Some(nb_steps) = parse_opt::<usize>(matches, "steps")? {
        config.training.n_training_steps = nb_steps;
    }
    if let Some(batch_size) = parse_opt::<usize>(matches, "batch")? {
        config.training.batch_size = batch_size;
    }
    if let Some(learning_rate) = parse_opt::<f64>(matches, "lr")? {
        config.training.learning_rate = learning_rate;
    }
    if let Some(print_after) = parse_opt::<usize>(matches, "print")? {
        config.training.print_after = print_after;
    }
    if let Some(size) = parse_opt::<usize>(matches, "validation")? {
        config.data.validation_dataset_size = size;
    }
    if let Some(eval_batch) = parse_opt::<usize>(matches, "evalbatch")? {
        config.evaluation.batch_size = eval_batch;
    }
    if let Some(n_changes) = parse_opt::<usize>(matches, "pos")? {
        config.data.n_changes_positive = n_changes;
    }
    if let Some(n_changes) = parse_opt::<usize>(matches, "neg")? {
        config.data.n_changes_negative = n_changes;
    }
    if let Some(seed) = parse_opt::<u64>(matches, "seed")? {
        config.seed = seed;
    }
    config.validate()?;
    let dump = matches.value_of("dump").map(|s| s.to_string());
    Ok((config, dump))
} // end of parse_train_args

fn train(config: &Config, dump: Option<String>) -> anyhow::Result<()> {
    log::info!("training configuration : {:?}", config);
    let data = &config.data;
    let model = GraphNet::<f32>::new(&config.model, data.node_feature_dim, data.edge_feature_dim, config.seed)?;
    let dataset = GraphEditDistanceDataset::new(data, true, config.seed)?;
    let mut validation = FixedGraphEditDistanceDataset::new(data, true, data.validation_dataset_size, FIXED_DATASET_SEED)?;
    let mut trainer = Trainer::new(model, &config.training, dataset)?;
    let evaluations = trainer.train(Some(&mut validation), config.evaluation.batch_size)?;
    if let Some(last) = evaluations.last() {
        log::info!("final validation : pair auc {:.4}, triplet accuracy {:.4}", last.pair_auc, last.triplet_accuracy);
    }
    if let Some(fname) = dump {
        dump_model(trainer.get_model(), Path::new(&fname))?;
    }
    Ok(())
} // end of train

// tries delimiters in turn
fn load_with_delimiters<T>(fname: &str, loader: impl Fn(&Path, u8) -> anyhow::Result<T>) -> anyhow::Result<T> {
    let delimiters = [b'\t', b',', b' '];
    for delim in delimiters {
        log::info!("gmatch trying reading {:?} with delimiter {}", fname, delim);
        match loader(Path::new(fname), delim) {
            Ok(loaded) => return Ok(loaded),
            Err(_) => log::error!("gmatch failed reading {:?} with delimiter {}", fname, delim),
        }
    }
    Err(anyhow!("could not read {}", fname))
} // end of load_with_delimiters

fn load_csv(fname: &str) -> anyhow::Result<PlainGraph> {
    load_with_delimiters(fname, |path, delim| Ok(graph_from_csv(path, delim)?.0))
}

fn embed(matches: &ArgMatches) -> anyhow::Result<()> {
    let model_file = matches.value_of("model").ok_or_else(|| anyhow!("embed needs --model"))?;
    let csv_files: Vec<&str> = matches.values_of("csvfile").map(|v| v.collect()).unwrap_or_default();
    let loss_type = parse_opt::<LossType>(matches, "loss")?.unwrap_or(LossType::Margin);
    let output = matches.value_of("output").unwrap_or(DEFAULT_VECTORS_OUTPUT);
    //
    let model = reload_model::<f32>(Path::new(model_file))?;
    let graphs = csv_files.iter().map(|f| load_csv(f)).collect::<anyhow::Result<Vec<PlainGraph>>>()?;
    let graph_refs: Vec<&PlainGraph> = graphs.iter().collect();
    let batch = GraphData::<f32>::pack_graphs(&graph_refs, model.get_node_feature_dim(), model.get_edge_feature_dim())?;
    let vectors = model.forward_tensor(&batch)?;
    //
    let n = graphs.len();
    match model.get_model_type() {
        ModelType::Matching => {
            let similarities = score_pairs(&model, loss_type, &batch)?;
            for (k, sim) in similarities.iter().enumerate() {
                log::info!("similarity {} / {} : {:.4e}", csv_files[2 * k], csv_files[2 * k + 1], sim);
            }
        }
        ModelType::Embedding => {
            for i in 0..n {
                for j in i + 1..n {
                    let sim = compute_similarity(loss_type, &vectors.narrow(0, i, 1)?, &vectors.narrow(0, j, 1)?)?;
                    log::info!("similarity {} / {} : {:.4e}", csv_files[i], csv_files[j], scalar_value::<f32>(&sim)?);
                }
            }
        }
    }
    dump_graph_vectors(&tensor_to_array2::<f32>(&vectors)?, Path::new(output))
} // end of embed

fn kgtrain(matches: &ArgMatches) -> anyhow::Result<()> {
    let (mut config, dump) = parse_train_args(matches)?;
    let labels_file = matches.value_of("labels").ok_or_else(|| anyhow!("kgtrain needs --labels"))?;
    let graph_files: Vec<&str> = matches.values_of("graph").map(|v| v.collect()).unwrap_or_default();
    let test_files: Vec<&str> = matches.values_of("test").map(|v| v.collect()).unwrap_or_default();
    //
    let embedding = Arc::new(load_with_delimiters(labels_file, label_embedding_from_csv)?);
    let graphs = graph_files.iter().map(|f| load_with_delimiters(f, labeled_graph_from_csv)).collect::<anyhow::Result<Vec<LabeledGraph>>>()?;
    let test_graphs = test_files.iter().map(|f| load_with_delimiters(f, labeled_graph_from_csv)).collect::<anyhow::Result<Vec<LabeledGraph>>>()?;
    let test_set = TestKnowledgeGraphDataset::new(test_graphs, embedding.clone())?;
    //
    config.data.node_feature_dim = embedding.get_dim();
    config.data.edge_feature_dim = KG_EDGE_FEATURE_DIM;
    log::info!("knowledge graph training configuration : {:?}", config);
    let data = &config.data;
    let model = GraphNet::<f32>::new(&config.model, data.node_feature_dim, data.edge_feature_dim, config.seed)?;
    let dataset = KnowledgeGraphEditDistanceDataset::new(graphs.clone(), embedding.clone(), data.n_changes_positive, data.n_changes_negative, true, config.seed)?;
    let mut validation =
        FixedKnowledgeGraphDataset::new(graphs, embedding, data.n_changes_positive, data.n_changes_negative, data.validation_dataset_size, FIXED_DATASET_SEED)?;
    let mut trainer = Trainer::new(model, &config.training, dataset)?;
    let evaluations = trainer.train(Some(&mut validation), config.evaluation.batch_size)?;
    if let Some(last) = evaluations.last() {
        log::info!("final validation : pair auc {:.4}, triplet accuracy {:.4}", last.pair_auc, last.triplet_accuracy);
    }
    let similarities = trainer.score_test_pairs(&test_set)?;
    for (k, sim) in similarities.iter().enumerate() {
        log::info!("test pair {} / {} : similarity {:.4e}", test_files[2 * k], test_files[2 * k + 1], sim);
    }
    if let Some(output) = matches.value_of("output") {
        dump_graph_vectors(&similarities.insert_axis(Axis(1)), Path::new(output))?;
    }
    if let Some(fname) = dump {
        dump_model(trainer.get_model(), Path::new(&fname))?;
    }
    Ok(())
} // end of kgtrain

// options shared by train and kgtrain
fn training_args(command: Command<'static>) -> Command<'static> {
    command
        .arg(Arg::new("model").long("model").takes_value(true).required(false).help("embedding or matching"))
        .arg(Arg::new("update").long("update").takes_value(true).required(false).help("node update : mlp, residual or gru"))
        .arg(Arg::new("aggregation").long("aggregation").takes_value(true).required(false).help("sum, mean, sqrt_n or max"))
        .arg(Arg::new("similarity").long("similarity").takes_value(true).required(false).help("attention similarity : euclidean, dotproduct or cosine"))
        .arg(Arg::new("prop").long("prop").takes_value(true).required(false).help("number of propagation layers"))
        .arg(Arg::new("mode").long("mode").takes_value(true).required(false).help("pair or triplet"))
        .arg(Arg::new("loss").long("loss").takes_value(true).required(false).help("margin or hamming"))
        .arg(Arg::new("steps").long("steps").takes_value(true).required(false).help("number of training steps"))
        .arg(Arg::new("batch").long("batch").takes_value(true).required(false).help("number of pairs or triplets in a batch"))
        .arg(Arg::new("evalbatch").long("evalbatch").takes_value(true).required(false).help("number of pairs or triplets in a validation batch"))
        .arg(Arg::new("lr").long("lr").takes_value(true).required(false).help("learning rate"))
        .arg(Arg::new("print").long("print").takes_value(true).required(false).help("log metrics every print steps"))
        .arg(Arg::new("validation").long("validation").takes_value(true).required(false).help("size of validation set"))
        .arg(Arg::new("pos").long("pos").takes_value(true).required(false).help("edge substitutions giving a similar graph"))
        .arg(Arg::new("neg").long("neg").takes_value(true).required(false).help("edge substitutions giving a dissimilar graph"))
        .arg(Arg::new("seed").long("seed").takes_value(true).required(false).help("seed of model and data"))
        .arg(Arg::new("dump").long("dump").takes_value(true).required(false).help("bson file to dump the trained model"))
} // end of training_args

pub fn main() {
    //
    env_logger::Builder::from_default_env().init();
    log::info!("logger initialized");
    //
    let matches = Command::new("gmatch")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(training_args(Command::new("train")))
        .subcommand(
            Command::new("embed")
                .arg_required_else_help(true)
                .arg(Arg::new("model").long("model").takes_value(true).required(true).help("bson dump of a model"))
                .arg(
                    Arg::new("csvfile")
                        .long("csv")
                        .takes_value(true)
                        .multiple_occurrences(true)
                        .required(true)
                        .help("csv edge list, repeat for each graph"),
                )
                .arg(Arg::new("loss").long("loss").takes_value(true).required(false).help("similarity of margin or hamming loss"))
                .arg(Arg::new("output").long("out").takes_value(true).required(false).help("bson file for graph vectors")),
        )
        .subcommand(
            training_args(Command::new("kgtrain"))
                .arg_required_else_help(true)
                .arg(Arg::new("labels").long("labels").takes_value(true).required(true).help("csv file of label vectors : label x_1 ... x_d"))
                .arg(
                    Arg::new("graph")
                        .long("graph")
                        .takes_value(true)
                        .multiple_occurrences(true)
                        .required(true)
                        .help("csv edge list of a training graph, repeat for each graph"),
                )
                .arg(
                    Arg::new("test")
                        .long("test")
                        .takes_value(true)
                        .multiple_occurrences(true)
                        .required(true)
                        .help("csv edge list of a test graph, graphs are compared 2 by 2"),
                )
                .arg(Arg::new("output").long("out").takes_value(true).required(false).help("bson file for test pair similarities")),
        )
        .get_matches();
    //
    let res = match matches.subcommand() {
        Some(("train", sub_m)) => {
            log::debug!("got train subcommand");
            parse_train_args(sub_m).and_then(|(config, dump)| train(&config, dump))
        }
        Some(("embed", sub_m)) => {
            log::debug!("got embed subcommand");
            embed(sub_m)
        }
        Some(("kgtrain", sub_m)) => {
            log::debug!("got kgtrain subcommand");
            kgtrain(sub_m)
        }
        _ => Err(anyhow!("expected subcommand train, embed or kgtrain")),
    };
    if let Err(e) = res {
        log::error!("gmatch failed : {:?}", e);
        std::process::exit(1);
    }
} // end of main

#[cfg(test)]
mod tests {

    use super::*;

    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn evalbatch_sets_validation_batch() {
        log_init_test();
        //
        let command = training_args(Command::new("train"));
        let matches = command.get_matches_from(vec!["train", "--batch", "10", "--evalbatch", "7", "--neg", "4"]);
        let (config, dump) = parse_train_args(&matches).unwrap();
        assert_eq!(config.training.batch_size, 10);
        assert_eq!(config.evaluation.batch_size, 7);
        assert_eq!(config.data.n_changes_negative, 4);
        assert!(dump.is_none());
        // 0 is rejected by validation
        let matches = training_args(Command::new("train")).get_matches_from(vec!["train", "--evalbatch", "0"]);
        assert!(parse_train_args(&matches).is_err());
    } // end of evalbatch_sets_validation_batch
} // end of mod tests
