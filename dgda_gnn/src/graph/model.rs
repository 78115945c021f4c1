use crate::graph::data::GraphDataBatch;
use burn::module::Param;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{log_sigmoid, log_softmax, relu, softmax};
use burn::tensor::Distribution;

/// Graph convolution `D^-1/2 (A + I) D^-1/2 X W + b`.
#[derive(Module, Debug)]
pub struct GcnConv<B: Backend> {
    linear: Linear<B>,
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> GcnConv<B> {
    pub fn new(input_size: usize, output_size: usize, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(input_size, output_size)
                .with_bias(false)
                .init(device),
            bias: Param::from_tensor(Tensor::zeros([output_size], device)),
        }
    }

    pub fn forward(&self, input: Tensor<B, 2>, graph: &GraphDataBatch<B>) -> Tensor<B, 2> {
        let x = self.linear.forward(input);
        let [_, output_size] = x.dims();

        let messages = x.select(0, graph.src.clone()) * graph.norm.clone();
        let x = Tensor::zeros([graph.node_len, output_size], &messages.device())
            .select_assign(0, graph.dst.clone(), messages);

        x + self.bias.val().unsqueeze()
    }
}

/// Stack of GCN layers with ReLU and dropout between them.
#[derive(Module, Debug)]
pub struct GcnEncoder<B: Backend> {
    convs: Vec<GcnConv<B>>,
    dropout: Dropout,
}

impl<B: Backend> GcnEncoder<B> {
    pub fn forward(&self, graph: &GraphDataBatch<B>) -> Tensor<B, 2> {
        let mut x = graph.node_tensor.clone();
        let last = self.convs.len().saturating_sub(1);
        for (idx, conv) in self.convs.iter().enumerate() {
            x = conv.forward(x, graph);
            if idx < last {
                x = self.dropout.forward(relu(x));
            }
        }
        relu(x)
    }
}

/// Gaussian posterior `q(z | h)` parameterised by mean and log-variance.
#[derive(Module, Debug)]
pub struct VariationalHead<B: Backend> {
    mu: Linear<B>,
    logvar: Linear<B>,
}

#[derive(Clone, Debug)]
pub struct Latent<B: Backend> {
    pub mu: Tensor<B, 2>,
    pub logvar: Tensor<B, 2>,
    pub z: Tensor<B, 2>,
}

impl<B: Backend> Latent<B> {
    /// `KL(q || N(0, I))` averaged over nodes.
    pub fn kl_divergence(&self) -> Tensor<B, 1> {
        let kl = self.mu.clone().powf_scalar(2.0) + self.logvar.clone().exp()
            - self.logvar.clone()
            - 1.0;
        kl.sum_dim(1).mean().mul_scalar(0.5)
    }
}

impl<B: Backend> VariationalHead<B> {
    pub fn forward(&self, hidden: Tensor<B, 2>, sample: bool) -> Latent<B> {
        let mu = self.mu.forward(hidden.clone());
        let logvar = self.logvar.forward(hidden);

        let z = if sample {
            let eps = Tensor::random(mu.shape(), Distribution::Normal(0.0, 1.0), &mu.device());
            mu.clone() + eps * logvar.clone().mul_scalar(0.5).exp()
        } else {
            mu.clone()
        };

        Latent { mu, logvar, z }
    }
}

#[derive(Module, Debug)]
pub struct MLP<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
}

impl<B: Backend> MLP<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear1.forward(input);
        let x = relu(x);
        self.linear2.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct MLPConfig {
    input_size: usize,
    hidden_size: usize,
    output_size: usize,
}

impl MLPConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MLP<B> {
        MLP {
            linear1: LinearConfig::new(self.input_size, self.hidden_size).init(device),
            linear2: LinearConfig::new(self.hidden_size, self.output_size).init(device),
        }
    }
}

/// The three latent factors of one graph: domain, semantic and random.
#[derive(Clone, Debug)]
pub struct Latents<B: Backend> {
    pub domain: Latent<B>,
    pub semantic: Latent<B>,
    pub random: Latent<B>,
}

impl<B: Backend> Latents<B> {
    pub fn kl_divergence(&self) -> Tensor<B, 1> {
        self.domain.kl_divergence() + self.semantic.kl_divergence() + self.random.kl_divergence()
    }

    /// `[z_d | z_y | z_m]`
    pub fn joint(&self) -> Tensor<B, 2> {
        Tensor::cat(
            vec![
                self.domain.z.clone(),
                self.semantic.z.clone(),
                self.random.z.clone(),
            ],
            1,
        )
    }

    /// Like [`Latents::joint`] with the rows of `z_m` reordered by `permutation`.
    pub fn joint_permuted(&self, permutation: Tensor<B, 1, Int>) -> Tensor<B, 2> {
        Tensor::cat(
            vec![
                self.domain.z.clone(),
                self.semantic.z.clone(),
                self.random.z.clone().select(0, permutation),
            ],
            1,
        )
    }
}

#[derive(Module, Debug)]
pub struct DgdaModel<B: Backend> {
    encoder: GcnEncoder<B>,
    domain_head: VariationalHead<B>,
    semantic_head: VariationalHead<B>,
    random_head: VariationalHead<B>,
    decoder: MLP<B>,
    label_classifier: Linear<B>,
    domain_classifier: Linear<B>,
    adversarial_classifier: Linear<B>,
}

impl<B: Backend> DgdaModel<B> {
    pub fn encode(&self, graph: &GraphDataBatch<B>, sample: bool) -> Latents<B> {
        let hidden = self.encoder.forward(graph);
        Latents {
            domain: self.domain_head.forward(hidden.clone(), sample),
            semantic: self.semantic_head.forward(hidden.clone(), sample),
            random: self.random_head.forward(hidden, sample),
        }
    }

    /// Class logits from the semantic latent.
    pub fn classify(&self, latents: &Latents<B>) -> Tensor<B, 2> {
        self.label_classifier.forward(latents.semantic.z.clone())
    }

    /// Domain logits from the domain latent.
    pub fn discriminate(&self, latents: &Latents<B>) -> Tensor<B, 2> {
        self.domain_classifier.forward(latents.domain.z.clone())
    }

    /// Domain logits from the semantic latent behind a gradient reversal layer.
    pub fn discriminate_adversarial(&self, latents: &Latents<B>, lambda: f64) -> Tensor<B, 2> {
        self.adversarial_classifier
            .forward(reverse_gradient(latents.semantic.z.clone(), lambda))
    }

    /// Inner-product logits of the decoded node pairs `(src[i], dst[i])`.
    pub fn edge_logits(
        &self,
        joint: Tensor<B, 2>,
        src: Tensor<B, 1, Int>,
        dst: Tensor<B, 1, Int>,
    ) -> Tensor<B, 1> {
        let h = self.decoder.forward(joint);
        (h.clone().select(0, src) * h.select(0, dst))
            .sum_dim(1)
            .squeeze(1)
    }

    /// Class logits for prediction: no sampling, semantic means only.
    pub fn forward(&self, graph: &GraphDataBatch<B>) -> Tensor<B, 2> {
        let latents = self.encode(graph, false);
        self.classify(&latents)
    }
}

#[derive(Config, Debug)]
pub struct DgdaModelConfig {
    pub in_dim: usize,
    pub num_classes: usize,
    #[config(default = 64)]
    pub hid_dim: usize,
    #[config(default = 2)]
    pub num_layers: usize,
    #[config(default = 0.1)]
    pub dropout: f64,
    #[config(default = 64)]
    pub dec_dim: usize,
    #[config(default = 64)]
    pub d_dim: usize,
    #[config(default = 256)]
    pub y_dim: usize,
    #[config(default = 128)]
    pub m_dim: usize,
}

impl DgdaModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DgdaModel<B> {
        let num_layers = self.num_layers.max(1);
        let convs = (0..num_layers)
            .map(|idx| {
                let input_size = if idx == 0 { self.in_dim } else { self.hid_dim };
                GcnConv::new(input_size, self.hid_dim, device)
            })
            .collect();

        let head = |latent_dim: usize| VariationalHead {
            mu: LinearConfig::new(self.hid_dim, latent_dim).init(device),
            logvar: LinearConfig::new(self.hid_dim, latent_dim).init(device),
        };

        DgdaModel {
            encoder: GcnEncoder {
                convs,
                dropout: DropoutConfig::new(self.dropout).init(),
            },
            domain_head: head(self.d_dim),
            semantic_head: head(self.y_dim),
            random_head: head(self.m_dim),
            decoder: MLPConfig::new(self.d_dim + self.y_dim + self.m_dim, self.dec_dim, self.dec_dim)
                .init(device),
            label_classifier: LinearConfig::new(self.y_dim, self.num_classes).init(device),
            domain_classifier: LinearConfig::new(self.d_dim, 2).init(device),
            adversarial_classifier: LinearConfig::new(self.y_dim, 2).init(device),
        }
    }
}

/// Identity on the forward pass; scales the gradient by `-lambda` on the way back.
pub fn reverse_gradient<B: Backend, const D: usize>(input: Tensor<B, D>, lambda: f64) -> Tensor<B, D> {
    let detached = input.clone().detach();
    input.mul_scalar(-lambda) + detached.mul_scalar(1.0 + lambda)
}

/// Binary cross-entropy with logits: positives pushed up, negatives down.
pub fn reconstruction_loss<B: Backend>(positive: Tensor<B, 1>, negative: Tensor<B, 1>) -> Tensor<B, 1> {
    log_sigmoid(positive).mean().neg() + log_sigmoid(negative.neg()).mean().neg()
}

/// Mean Shannon entropy of the softmax over `logits`.
pub fn entropy_loss<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1> {
    let probs = softmax(logits.clone(), 1);
    let log_probs = log_softmax(logits, 1);
    (probs * log_probs).sum_dim(1).mean().neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::data::{GraphData, GraphDataBatcher};
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataloader::batcher::Batcher;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn triangle() -> GraphData {
        GraphData::from_data(
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0],
            vec![[0, 1], [1, 0], [1, 2], [2, 1], [0, 2], [2, 0]],
            vec![0, 1, 0],
            3,
            2,
        )
        .unwrap()
    }

    fn small_config() -> DgdaModelConfig {
        DgdaModelConfig::new(2, 2)
            .with_hid_dim(4)
            .with_dec_dim(3)
            .with_d_dim(2)
            .with_y_dim(3)
            .with_m_dim(2)
    }

    #[test]
    fn gcn_conv_output_shape() {
        let device = Default::default();
        let batch = GraphDataBatcher::<TestBackend>::new(device).batch(vec![triangle()]);
        let conv = GcnConv::<TestBackend>::new(2, 5, &device);

        assert_eq!(conv.forward(batch.node_tensor.clone(), &batch).dims(), [3, 5]);
    }

    #[test]
    fn gcn_conv_sums_normalised_messages() {
        let device = Default::default();
        // star around node 0; with self-loops node 0 has degree 3, leaves degree 2
        let star = GraphData::from_data(
            vec![1.0, 2.0, 4.0],
            vec![[0, 1], [1, 0], [0, 2], [2, 0]],
            vec![0, 1, 0],
            3,
            1,
        )
        .unwrap();
        let batch = GraphDataBatcher::<TestBackend>::new(device).batch(vec![star]);
        let mut conv = GcnConv::<TestBackend>::new(1, 1, &device);
        conv.linear.weight = Param::from_tensor(Tensor::ones([1, 1], &device));

        let leaf_to_center = 1.0 / 6f32.sqrt();
        let expected = TensorData::from([
            [1.0 / 3.0 + (2.0 + 4.0) * leaf_to_center],
            [2.0 / 2.0 + leaf_to_center],
            [4.0 / 2.0 + leaf_to_center],
        ]);
        conv.forward(batch.node_tensor.clone(), &batch)
            .into_data()
            .assert_approx_eq(&expected, 4);
    }

    #[test]
    fn forward_shapes() {
        let device = Default::default();
        let batch = GraphDataBatcher::<TestBackend>::new(device).batch(vec![triangle()]);
        let model = small_config().init::<TestBackend>(&device);

        let latents = model.encode(&batch, true);
        assert_eq!(latents.joint().dims(), [3, 7]);
        assert_eq!(model.forward(&batch).dims(), [3, 2]);
        assert_eq!(model.discriminate(&latents).dims(), [3, 2]);

        let src = Tensor::from_data(TensorData::new(vec![0i64, 1], [2]), &device);
        let dst = Tensor::from_data(TensorData::new(vec![1i64, 2], [2]), &device);
        assert_eq!(model.edge_logits(latents.joint(), src, dst).dims(), [2]);
    }

    #[test]
    fn prediction_ignores_sampling() {
        let device = Default::default();
        let batch = GraphDataBatcher::<TestBackend>::new(device).batch(vec![triangle()]);
        let model = small_config().init::<TestBackend>(&device);

        let first = model.forward(&batch).into_data();
        let second = model.forward(&batch).into_data();
        first.assert_approx_eq(&second, 5);
    }

    #[test]
    fn kl_of_standard_normal_is_zero() {
        let device = Default::default();
        let zeros = Tensor::<TestBackend, 2>::zeros([4, 3], &device);
        let latent = Latent {
            mu: zeros.clone(),
            logvar: zeros.clone(),
            z: zeros,
        };
        let kl: f32 = latent.kl_divergence().into_scalar();
        assert!(kl.abs() < 1e-6);
    }

    #[test]
    fn entropy_of_uniform_logits_is_log_k() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        let entropy: f32 = entropy_loss(logits).into_scalar();
        assert!((entropy - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn reconstruction_loss_prefers_separated_scores() {
        let device = Default::default();
        let good: f32 = reconstruction_loss(
            Tensor::<TestBackend, 1>::from_floats([5.0, 5.0], &device),
            Tensor::<TestBackend, 1>::from_floats([-5.0, -5.0], &device),
        )
        .into_scalar();
        let bad: f32 = reconstruction_loss(
            Tensor::<TestBackend, 1>::from_floats([-5.0, -5.0], &device),
            Tensor::<TestBackend, 1>::from_floats([5.0, 5.0], &device),
        )
        .into_scalar();
        assert!(good < 0.1);
        assert!(bad > 5.0);
    }

    #[test]
    fn gradient_reversal_flips_sign() {
        let device = Default::default();
        let x = Tensor::<TestAutodiffBackend, 1>::from_floats([1.0, 2.0], &device).require_grad();

        let y = reverse_gradient(x.clone(), 1.0);
        y.clone().into_data().assert_approx_eq(&x.clone().into_data(), 5);

        let grads = y.sum().backward();
        let grad = x.grad(&grads).unwrap();
        grad.into_data()
            .assert_approx_eq(&TensorData::from([-1.0f32, -1.0]), 5);
    }
}
