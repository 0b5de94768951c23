use std::path::PathBuf;

pub const CONFIG: &str = r#"service_name: orders_api
project: ./orders
tags:
  env: prod
backend:
  container_port: 8000
  lb_port: 80
  cpu: 512
  memory: 1024
  desired_count: 3
database:
  db_name: orders
  username: orders
network:
  vpc_id: vpc-0123456789abcdef0
  public_subnets: [subnet-0a, subnet-0b]
  private_subnets:
    - subnet-1a
    - subnet-1b
roles:
  ecs_execution_role: arn:aws:iam::123456789012:role/ecs-execution
  ecs_task_role: arn:aws:iam::123456789012:role/ecs-task
"#;

pub struct TestFiles {
    pub dir: PathBuf,
    pub config: PathBuf,
    pub plan: PathBuf,
}

impl TestFiles {
    pub fn create(test_name: &str, config: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("deployer_test_{}", test_name));
        std::fs::create_dir_all(&dir).unwrap();

        let plan = dir.join("plan.yaml");
        let config_path = dir.join("service.yaml");
        std::fs::write(&config_path, config).unwrap();

        Self {
            dir,
            config: config_path,
            plan,
        }
    }
}

impl Drop for TestFiles {
    fn drop(&mut self) {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }
}
